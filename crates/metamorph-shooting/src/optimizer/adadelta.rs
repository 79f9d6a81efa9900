//! Adadelta optimizer.
//!
//! Per-element step sizes from running averages of squared gradients and
//! squared updates, scaled by the learning rate. One cost evaluation per step.

use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::evaluation::Evaluation;
use super::trait_::{Objective, Optimizer, StepOutcome};

/// Adadelta configuration.
#[derive(Config, Debug, PartialEq)]
pub struct AdadeltaConfig {
    /// Learning rate
    #[config(default = 1.0)]
    pub learning_rate: f64,
    /// Decay of the running averages
    #[config(default = 0.9)]
    pub rho: f64,
    /// Numerical stability term
    #[config(default = 1e-6)]
    pub epsilon: f64,
}

impl AdadeltaConfig {
    pub fn init<B: Backend, const D: usize>(&self) -> Adadelta<B, D> {
        Adadelta {
            config: self.clone(),
            learning_rate: self.learning_rate,
            square_avg: None,
            delta_avg: None,
        }
    }
}

/// Adadelta optimizer.
#[derive(Debug, Clone)]
pub struct Adadelta<B: Backend, const D: usize> {
    config: AdadeltaConfig,
    learning_rate: f64,
    square_avg: Option<Tensor<B, D>>,
    delta_avg: Option<Tensor<B, D>>,
}

impl<B: Backend, const D: usize> Optimizer<B, D> for Adadelta<B, D> {
    fn step(&mut self, current: &Evaluation<B, D>, objective: &mut Objective<'_, B, D>) -> crate::error::Result<StepOutcome<B, D>> {
        let rho = self.config.rho;
        let eps = self.config.epsilon;
        let gradient = current.gradient.clone();

        let square_avg = self
            .square_avg
            .take()
            .unwrap_or_else(|| gradient.zeros_like())
            .mul_scalar(rho)
            + gradient.clone().powf_scalar(2.0).mul_scalar(1.0 - rho);
        let delta_avg = self.delta_avg.take().unwrap_or_else(|| gradient.zeros_like());

        let delta = delta_avg.clone().add_scalar(eps).sqrt() / square_avg.clone().add_scalar(eps).sqrt() * gradient;
        let delta_avg = delta_avg.mul_scalar(rho) + delta.clone().powf_scalar(2.0).mul_scalar(1.0 - rho);

        self.square_avg = Some(square_avg);
        self.delta_avg = Some(delta_avg);

        let candidate = current.parameters.clone() - delta.mul_scalar(self.learning_rate);
        Ok(StepOutcome::Accepted(objective(candidate)?))
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn reset(&mut self) {
        self.square_avg = None;
        self.delta_avg = None;
    }

    fn name(&self) -> &'static str {
        "adadelta"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::evaluation::CostBreakdown;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn bowl(x: Tensor<B, 2>) -> crate::error::Result<Evaluation<B, 2>> {
        let diff = x.clone().sub_scalar(3.0);
        let cost = crate::validation::scalar(&diff.clone().powf_scalar(2.0).sum());
        Ok(Evaluation {
            parameters: x,
            cost: CostBreakdown {
                total: cost,
                data: cost,
                regularization: 0.0,
            },
            gradient: diff.mul_scalar(2.0),
            energy_drift: 1.0,
        })
    }

    #[test]
    fn test_decreases_cost() {
        let device = Default::default();
        let mut optimizer = AdadeltaConfig::new().with_learning_rate(50.0).init::<B, 2>();
        let mut objective = |x: Tensor<B, 2>| bowl(x);
        let mut current = bowl(Tensor::zeros([2, 3], &device)).unwrap();
        let initial = current.cost.total;

        for _ in 0..50 {
            if let StepOutcome::Accepted(next) = optimizer.step(&current, &mut objective).unwrap() {
                current = next;
            }
        }
        assert!(current.cost.total < initial);
    }

    #[test]
    fn test_reset_clears_state() {
        let device = Default::default();
        let mut optimizer = AdadeltaConfig::new().init::<B, 2>();
        let mut objective = |x: Tensor<B, 2>| bowl(x);
        let current = bowl(Tensor::zeros([1, 2], &device)).unwrap();
        optimizer.step(&current, &mut objective).unwrap();
        assert!(optimizer.square_avg.is_some());
        optimizer.reset();
        assert!(optimizer.square_avg.is_none());
        assert_eq!(Optimizer::<B, 2>::name(&optimizer), "adadelta");
    }
}
