//! Optimizer trait for initial-momentum optimization.
//!
//! Optimizers work on detached tensors of the inner (non-autodiff) backend.
//! Each step may evaluate the cost as often as it needs through the objective
//! closure supplied by the controller.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use super::adadelta::{Adadelta, AdadeltaConfig};
use super::evaluation::Evaluation;
use super::gradient_descent::GradientDescent;
use super::lbfgs::{Lbfgs, LbfgsConfig};
use crate::error::{Result, ShootingError};

/// Cost-and-gradient oracle handed to [`Optimizer::step`].
pub type Objective<'a, B, const D: usize> = dyn FnMut(Tensor<B, D>) -> Result<Evaluation<B, D>> + 'a;

/// Outcome of one optimizer step.
#[derive(Debug, Clone)]
pub enum StepOutcome<B: Backend, const D: usize> {
    /// The step produced a new iterate.
    Accepted(Evaluation<B, D>),
    /// The step could not improve the iterate (e.g. the line search failed).
    /// The current iterate stays in place.
    NoProgress { reason: String },
}

/// Optimizer trait.
///
/// # Type Parameters
/// * `B` - The inner backend of the parameters
/// * `D` - The tensor rank of the parameters
pub trait Optimizer<B: Backend, const D: usize> {
    /// Perform a single optimization step from `current`.
    ///
    /// Errors returned by `objective` are propagated unchanged.
    fn step(&mut self, current: &Evaluation<B, D>, objective: &mut Objective<'_, B, D>) -> Result<StepOutcome<B, D>>;

    /// Get the current learning rate.
    fn learning_rate(&self) -> f64;

    /// Set the learning rate.
    fn set_learning_rate(&mut self, lr: f64);

    /// Forget any accumulated state (curvature pairs, running averages).
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Optimizer selection by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizerMethod {
    /// Quasi-Newton with backtracking line search.
    #[default]
    Lbfgs,
    /// Adaptive first-order method, one evaluation per step.
    Adadelta,
    /// Plain gradient descent.
    GradientDescent,
}

impl OptimizerMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lbfgs => "LBFGS_torch",
            Self::Adadelta => "adadelta",
            Self::GradientDescent => "gradient_descent",
        }
    }

    /// Build the optimizer with learning rate `learning_rate`.
    pub fn build<B: Backend, const D: usize>(&self, learning_rate: f64, history_size: usize) -> Box<dyn Optimizer<B, D>> {
        match self {
            Self::Lbfgs => Box::new(
                LbfgsConfig::new()
                    .with_learning_rate(learning_rate)
                    .with_history_size(history_size)
                    .init::<B, D>(),
            ),
            Self::Adadelta => Box::new(AdadeltaConfig::new().with_learning_rate(learning_rate).init::<B, D>()),
            Self::GradientDescent => Box::new(GradientDescent::<B, D>::new(learning_rate)),
        }
    }
}

impl FromStr for OptimizerMethod {
    type Err = ShootingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "LBFGS_torch" | "lbfgs" | "LBFGS" => Ok(Self::Lbfgs),
            "adadelta" => Ok(Self::Adadelta),
            "gradient_descent" | "sgd" => Ok(Self::GradientDescent),
            other => Err(ShootingError::invalid_configuration(format!(
                "unknown optimizer '{other}', expected \"LBFGS_torch\", \"adadelta\" or \"gradient_descent\""
            ))),
        }
    }
}

impl fmt::Display for OptimizerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dot product of two flattened tensors.
pub(crate) fn dot<B: Backend>(a: &Tensor<B, 1>, b: &Tensor<B, 1>) -> f64 {
    crate::validation::scalar(&(a.clone() * b.clone()).sum())
}
