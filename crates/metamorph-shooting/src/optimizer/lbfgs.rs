//! L-BFGS Optimizer Implementation
//!
//! Limited-memory BFGS with a backtracking Armijo line search, following the
//! standard two-loop recursion. Parameters are flattened to 1D internally.

use std::collections::VecDeque;

use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::evaluation::Evaluation;
use super::trait_::{dot, Objective, Optimizer, StepOutcome};

/// L-BFGS Configuration
#[derive(Config, Debug, PartialEq)]
pub struct LbfgsConfig {
    /// History size (number of curvature pairs to keep)
    #[config(default = 10)]
    pub history_size: usize,
    /// Learning rate (first trial step of every line search)
    #[config(default = 1.0)]
    pub learning_rate: f64,
    /// Maximum number of cost evaluations per line search
    #[config(default = 20)]
    pub max_line_search: usize,
    /// Sufficient-decrease constant of the Armijo condition
    #[config(default = 1e-4)]
    pub armijo: f64,
    /// Step shrink factor between line-search trials
    #[config(default = 0.5)]
    pub shrink: f64,
}

impl LbfgsConfig {
    /// Initialize L-BFGS optimizer
    pub fn init<B: Backend, const D: usize>(&self) -> Lbfgs<B, D> {
        Lbfgs {
            config: self.clone(),
            learning_rate: self.learning_rate,
            s_history: VecDeque::with_capacity(self.history_size),
            y_history: VecDeque::with_capacity(self.history_size),
            rho_history: VecDeque::with_capacity(self.history_size),
            iterations: 0,
        }
    }
}

/// L-BFGS optimizer.
#[derive(Debug, Clone)]
pub struct Lbfgs<B: Backend, const D: usize> {
    config: LbfgsConfig,
    learning_rate: f64,
    /// Parameter differences `x_{k+1} - x_k`
    s_history: VecDeque<Tensor<B, 1>>,
    /// Gradient differences `g_{k+1} - g_k`
    y_history: VecDeque<Tensor<B, 1>>,
    /// `1 / (y^T s)`
    rho_history: VecDeque<f64>,
    iterations: usize,
}

impl<B: Backend, const D: usize> Lbfgs<B, D> {
    pub fn new(learning_rate: f64) -> Self {
        LbfgsConfig::new().with_learning_rate(learning_rate).init()
    }

    /// Number of stored curvature pairs.
    pub fn history_len(&self) -> usize {
        self.s_history.len()
    }

    /// Search direction `-H g` from the two-loop recursion.
    fn direction(&self, gradient: Tensor<B, 1>) -> Tensor<B, 1> {
        let len = self.s_history.len();
        let mut q = gradient;
        let mut alphas = vec![0.0; len];

        // First loop (backward)
        for i in (0..len).rev() {
            let alpha = self.rho_history[i] * dot(&self.s_history[i], &q);
            alphas[i] = alpha;
            q = q - self.y_history[i].clone().mul_scalar(alpha);
        }

        // Initial Hessian approximation gamma = (s^T y) / (y^T y)
        let gamma = match (self.s_history.back(), self.y_history.back()) {
            (Some(s), Some(y)) => {
                let yy = dot(y, y);
                if yy > 0.0 {
                    dot(s, y) / yy
                } else {
                    1.0
                }
            }
            _ => 1.0,
        };
        let mut r = q.mul_scalar(gamma);

        // Second loop (forward)
        for i in 0..len {
            let beta = self.rho_history[i] * dot(&self.y_history[i], &r);
            r = r + self.s_history[i].clone().mul_scalar(alphas[i] - beta);
        }

        r.neg()
    }

    fn remember(&mut self, s: Tensor<B, 1>, y: Tensor<B, 1>) {
        let ys = dot(&y, &s);
        // Curvature condition
        if ys <= 1e-10 {
            tracing::debug!(ys, "L-BFGS: skipping curvature pair");
            return;
        }
        if self.s_history.len() >= self.config.history_size {
            self.s_history.pop_front();
            self.y_history.pop_front();
            self.rho_history.pop_front();
        }
        self.s_history.push_back(s);
        self.y_history.push_back(y);
        self.rho_history.push_back(1.0 / ys);
    }
}

impl<B: Backend, const D: usize> Optimizer<B, D> for Lbfgs<B, D> {
    fn step(&mut self, current: &Evaluation<B, D>, objective: &mut Objective<'_, B, D>) -> crate::error::Result<StepOutcome<B, D>> {
        let shape = current.parameters.dims();
        let n: usize = shape.iter().product();
        let x = current.parameters.clone().reshape([n]);
        let g = current.gradient.clone().reshape([n]);

        let mut direction = self.direction(g.clone());
        let mut slope = dot(&g, &direction);
        if !(slope < 0.0) {
            if !self.s_history.is_empty() {
                tracing::debug!(slope, "L-BFGS: not a descent direction, resetting history");
                self.reset();
            }
            direction = g.clone().neg();
            slope = -dot(&g, &g);
        }
        if !(slope < 0.0) {
            return Ok(StepOutcome::NoProgress {
                reason: "gradient vanished".to_string(),
            });
        }

        let mut alpha = self.learning_rate;
        if self.iterations == 0 && self.s_history.is_empty() {
            let l1 = crate::validation::scalar(&g.clone().abs().sum());
            alpha *= (1.0 / l1).min(1.0);
        }

        let baseline = current.cost.total;
        for trial in 0..self.config.max_line_search {
            let candidate = x.clone() + direction.clone().mul_scalar(alpha);
            let evaluation = objective(candidate.clone().reshape(shape))?;

            if evaluation.cost.total <= baseline + self.config.armijo * alpha * slope {
                let s = candidate - x;
                let y = evaluation.gradient.clone().reshape([n]) - g;
                self.remember(s, y);
                self.iterations += 1;
                tracing::trace!(trial, alpha, cost = evaluation.cost.total, "L-BFGS step accepted");
                return Ok(StepOutcome::Accepted(evaluation));
            }
            alpha *= self.config.shrink;
        }

        self.reset();
        Ok(StepOutcome::NoProgress {
            reason: format!(
                "line search found no sufficient decrease in {} evaluations",
                self.config.max_line_search
            ),
        })
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn reset(&mut self) {
        self.s_history.clear();
        self.y_history.clear();
        self.rho_history.clear();
        self.iterations = 0;
    }

    fn name(&self) -> &'static str {
        "LBFGS_torch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::evaluation::CostBreakdown;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    /// f(x) = 0.5 * sum(a_i * (x_i - 1)^2)
    fn quadratic(x: Tensor<B, 2>) -> crate::error::Result<Evaluation<B, 2>> {
        let device = x.device();
        let a = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 4.0, 9.0, 0.5], [1, 4]), &device);
        let diff = x.clone().sub_scalar(1.0);
        let cost = crate::validation::scalar(&(a.clone() * diff.clone().powf_scalar(2.0)).sum()) * 0.5;
        Ok(Evaluation {
            parameters: x,
            cost: CostBreakdown {
                total: cost,
                data: cost,
                regularization: 0.0,
            },
            gradient: a * diff,
            energy_drift: 1.0,
        })
    }

    #[test]
    fn test_minimizes_quadratic() {
        let device = Default::default();
        let mut optimizer = Lbfgs::<B, 2>::new(1.0);
        let mut objective = |x: Tensor<B, 2>| quadratic(x);
        let mut current = quadratic(Tensor::zeros([1, 4], &device)).unwrap();
        let initial = current.cost.total;
        let mut longest_history = 0;

        for _ in 0..30 {
            match optimizer.step(&current, &mut objective).unwrap() {
                StepOutcome::Accepted(next) => {
                    assert!(next.cost.total <= current.cost.total);
                    current = next;
                    longest_history = longest_history.max(optimizer.history_len());
                }
                // A failed line search clears the history.
                StepOutcome::NoProgress { .. } => {
                    assert_eq!(optimizer.history_len(), 0);
                    break;
                }
            }
        }
        assert!(current.cost.total < initial * 1e-6);
        assert!(longest_history > 0);
    }

    #[test]
    fn test_first_step_is_scaled() {
        let device = Default::default();
        let mut optimizer = Lbfgs::<B, 2>::new(1.0);
        let mut calls = Vec::new();
        let mut objective = |x: Tensor<B, 2>| {
            calls.push(x.clone().abs().max().into_scalar());
            quadratic(x)
        };
        let current = quadratic(Tensor::zeros([1, 4], &device)).unwrap();
        optimizer.step(&current, &mut objective).unwrap();

        // |g|_1 = 14.5, so the first trial moves at most max|g| / 14.5.
        assert!((calls[0] - 9.0 / 14.5).abs() < 1e-5);
    }

    #[test]
    fn test_line_search_failure_is_no_progress() {
        let device = Default::default();
        let mut optimizer = LbfgsConfig::new().with_max_line_search(3).init::<B, 2>();
        // Reports a gradient but the cost never decreases.
        let mut objective = |x: Tensor<B, 2>| -> crate::error::Result<Evaluation<B, 2>> {
            let mut evaluation = quadratic(x)?;
            evaluation.cost.total = 1e9;
            Ok(evaluation)
        };
        let current = quadratic(Tensor::zeros([1, 4], &device)).unwrap();
        let outcome = optimizer.step(&current, &mut objective).unwrap();
        assert!(matches!(outcome, StepOutcome::NoProgress { .. }));
        assert_eq!(optimizer.history_len(), 0);
    }

    #[test]
    fn test_objective_errors_propagate() {
        let device = Default::default();
        let mut optimizer = Lbfgs::<B, 2>::new(1.0);
        let mut objective =
            |_: Tensor<B, 2>| -> crate::error::Result<Evaluation<B, 2>> { Err(crate::error::ShootingError::numerical_instability("nan")) };
        let current = quadratic(Tensor::zeros([1, 4], &device)).unwrap();
        let err = optimizer.step(&current, &mut objective).unwrap_err();
        assert!(err.is_numerical_instability());
    }
}
