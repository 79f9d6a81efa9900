//! Plain gradient descent.

use std::marker::PhantomData;

use burn::tensor::backend::Backend;

use super::evaluation::Evaluation;
use super::trait_::{Objective, Optimizer, StepOutcome};
use crate::error::Result;

/// `x <- x - learning_rate * g`, one evaluation per step.
#[derive(Debug, Clone)]
pub struct GradientDescent<B: Backend, const D: usize> {
    learning_rate: f64,
    _backend: PhantomData<B>,
}

impl<B: Backend, const D: usize> GradientDescent<B, D> {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend, const D: usize> Optimizer<B, D> for GradientDescent<B, D> {
    fn step(&mut self, current: &Evaluation<B, D>, objective: &mut Objective<'_, B, D>) -> Result<StepOutcome<B, D>> {
        let candidate = current.parameters.clone() - current.gradient.clone().mul_scalar(self.learning_rate);
        Ok(StepOutcome::Accepted(objective(candidate)?))
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "gradient_descent"
    }
}
