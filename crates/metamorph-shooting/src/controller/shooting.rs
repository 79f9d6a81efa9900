//! The shooting controller: owns a registration problem and optimizes its
//! initial momentum.

use std::sync::Arc;

use burn::config::Config;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use super::problem::ShootingProblem;
use super::safe_mode::{OptimizationPhase, OptimizationStatus, SafeModeConfig, SafeModePolicy, Verdict};
use crate::data_term::{DataTerm, Ssd};
use crate::error::ShootingError;
use crate::integrator::{Integrator, Shot, Trajectory};
use crate::optimizer::{CostBreakdown, Evaluation, OptimizerMethod, StepOutcome};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::validation::{self, ConvergenceChecker};

type Inner<B> = <B as AutodiffBackend>::InnerBackend;

/// Cost model and optimizer settings of a [`ShootingController`].
#[derive(Config, Debug)]
pub struct ShootingConfig {
    /// Weight of the regularisation energy in the cost.
    pub cost_cst: f64,
    #[config(default = "OptimizerMethod::Lbfgs")]
    pub optimizer_method: OptimizerMethod,
    /// Regularise with the mean energy along the trajectory instead of the initial energy.
    #[config(default = false)]
    pub hamiltonian_integration: bool,
    #[config(default = "SafeModeConfig::new()")]
    pub safe_mode: SafeModeConfig,
    /// Relative improvement below which the cost is considered flat.
    #[config(default = 1e-9)]
    pub min_improvement: f64,
    /// Number of flat iterations before convergence is declared.
    #[config(default = 10)]
    pub patience: usize,
    /// Gradient max-norm below which the optimization has converged.
    #[config(default = 1e-10)]
    pub gradient_tolerance: f64,
    /// Curvature pairs kept by L-BFGS.
    #[config(default = 10)]
    pub history_size: usize,
}

/// Summary of one optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub status: OptimizationStatus,
    /// Total cost after every performed iteration.
    pub cost_history: Vec<f64>,
    /// Cost of the initial momentum.
    pub initial_cost: f64,
    /// Cost of the returned momentum.
    pub best_cost: f64,
    pub iterations: usize,
    pub retries_used: usize,
    pub final_learning_rate: f64,
}

enum Attempt<B: Backend, const D: usize> {
    Accepted(Evaluation<B, D>),
    Stalled(String),
    Diverged(String),
}

/// Geodesic shooting controller.
///
/// Holds the source, the target, an [`Integrator`] and the cost model. After
/// an optimization it retains the optimized initial momentum, the cost
/// history and the recorded [`Trajectory`] of the optimized momentum.
pub struct ShootingController<B: AutodiffBackend, const D: usize> {
    problem: ShootingProblem<B, D>,
    config: ShootingConfig,
    tracker: ProgressTracker,
    trajectory: Trajectory<B, D>,
    momentum: Option<Tensor<B, D>>,
    cost_history: Vec<CostBreakdown>,
    report: Option<OptimizationReport>,
    phase: OptimizationPhase,
}

impl<B: AutodiffBackend, const D: usize> ShootingController<B, D> {
    /// Create a controller. The data term defaults to [`Ssd`].
    pub fn new(
        source: Tensor<B, D>,
        target: Tensor<B, D>,
        integrator: Integrator<B, D>,
        config: ShootingConfig,
        data_term: Option<Box<dyn DataTerm<B, D>>>,
    ) -> crate::error::Result<Self> {
        validation::validate_rank::<D>()?;
        validation::validate_spatial_extent(&source.dims())?;
        validation::validate_same_shape(&source, &target)?;
        validation::validate_same_device("target", &source, &target)?;
        validation::validate_non_negative("cost_cst", config.cost_cst)?;
        validation::validate_lbfgs_history_size(config.history_size)?;
        validation::validate_positive("safe-mode backoff factor", config.safe_mode.backoff_factor)?;
        if config.safe_mode.backoff_factor >= 1.0 {
            return Err(ShootingError::invalid_configuration(format!(
                "safe-mode backoff factor must be below 1, got {}",
                config.safe_mode.backoff_factor
            )));
        }
        integrator.regime().validate(source.dims())?;

        let data_term = data_term.unwrap_or_else(|| Box::new(Ssd::new()));
        let trajectory = Trajectory::new(integrator.config().dx_convention);
        Ok(Self {
            problem: ShootingProblem {
                source: source.detach(),
                target: target.detach(),
                integrator,
                data_term,
                cost_cst: config.cost_cst,
                hamiltonian_integration: config.hamiltonian_integration,
            },
            config,
            tracker: ProgressTracker::new(),
            trajectory,
            momentum: None,
            cost_history: Vec::new(),
            report: None,
            phase: OptimizationPhase::Initialized,
        })
    }

    /// Register a progress callback.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.tracker.add_callback(callback);
    }

    pub fn config(&self) -> &ShootingConfig {
        &self.config
    }

    pub fn integrator(&self) -> &Integrator<B, D> {
        &self.problem.integrator
    }

    pub fn source(&self) -> &Tensor<B, D> {
        &self.problem.source
    }

    pub fn target(&self) -> &Tensor<B, D> {
        &self.problem.target
    }

    pub fn phase(&self) -> OptimizationPhase {
        self.phase
    }

    pub fn status(&self) -> Option<OptimizationStatus> {
        self.phase.status()
    }

    /// Trajectory of the optimized momentum (empty before any optimization).
    pub fn trajectory(&self) -> &Trajectory<B, D> {
        &self.trajectory
    }

    /// Optimized initial momentum.
    pub fn momentum(&self) -> Option<&Tensor<B, D>> {
        self.momentum.as_ref()
    }

    /// Cost after every iteration of the last run.
    pub fn cost_history(&self) -> &[CostBreakdown] {
        &self.cost_history
    }

    pub fn report(&self) -> Option<&OptimizationReport> {
        self.report.as_ref()
    }

    /// Integrate `momentum` from the source without optimizing.
    pub fn integrate(&self, momentum: Tensor<B, D>) -> crate::error::Result<Shot<B, D>> {
        self.problem.integrator.shoot(self.problem.source.clone(), momentum.detach(), None)
    }

    /// Cost of shooting `momentum`.
    pub fn cost_of(&self, momentum: Tensor<B, D>) -> crate::error::Result<CostBreakdown> {
        let shot = self.integrate(momentum)?;
        Ok(self.problem.cost(&shot)?.breakdown())
    }

    /// Optimize the initial momentum. Numerical failures are returned as errors.
    #[tracing::instrument(skip(self, initial))]
    pub fn optimize(&mut self, initial: Tensor<B, D>, n_iter: usize, grad_coef: f64) -> crate::error::Result<OptimizationReport> {
        self.run(initial, n_iter, grad_coef, false)
    }

    /// Optimize with divergence detection, learning-rate backoff and early stop.
    #[tracing::instrument(skip(self, initial))]
    pub fn optimize_safe(&mut self, initial: Tensor<B, D>, n_iter: usize, grad_coef: f64) -> crate::error::Result<OptimizationReport> {
        self.run(initial, n_iter, grad_coef, true)
    }

    fn run(&mut self, initial: Tensor<B, D>, n_iter: usize, grad_coef: f64, safe: bool) -> crate::error::Result<OptimizationReport> {
        validation::validate_iterations(n_iter)?;
        validation::validate_learning_rate(grad_coef)?;
        self.problem.integrator.check_compatible(&self.problem.source, &initial)?;

        self.phase = OptimizationPhase::Initialized;
        self.cost_history.clear();
        self.trajectory.reset();
        self.momentum = None;
        self.report = None;

        let result = self.iterate(initial, n_iter, grad_coef, safe);
        if let Err(err) = &result {
            self.tracker.error(&err.to_string());
        }
        result
    }

    fn iterate(&mut self, initial: Tensor<B, D>, n_iter: usize, grad_coef: f64, safe: bool) -> crate::error::Result<OptimizationReport> {
        let mut optimizer = self
            .config
            .optimizer_method
            .build::<Inner<B>, D>(grad_coef, self.config.history_size);
        let mut policy = SafeModePolicy::new(self.config.safe_mode.clone());
        let checker = ConvergenceChecker::new(self.config.min_improvement, self.config.patience);

        let problem = &self.problem;
        // `current` is what the optimizer steps from; `best` is the lowest cost seen.
        let mut current = problem.evaluate(initial.detach().inner())?;
        let mut best = current.clone();
        let initial_cost = current.cost.total;
        tracing::info!(
            initial_cost,
            optimizer = optimizer.name(),
            safe,
            "starting shooting optimization"
        );
        self.tracker.start(n_iter, initial_cost);

        let mut totals = Vec::with_capacity(n_iter);
        let mut status = OptimizationStatus::MaxIterReached;
        let mut phase = OptimizationPhase::Initialized;

        'outer: for iteration in 1..=n_iter {
            let gradient_norm = validation::scalar(&current.gradient.clone().abs().max());
            if gradient_norm < self.config.gradient_tolerance {
                tracing::info!(iteration, gradient_norm, "gradient vanished");
                status = OptimizationStatus::Converged;
                break;
            }
            phase = phase.advance(iteration);

            let accepted = loop {
                let mut objective = |parameters: Tensor<Inner<B>, D>| problem.evaluate(parameters);
                let attempt = match optimizer.step(&current, &mut objective) {
                    Ok(StepOutcome::Accepted(candidate)) if safe => {
                        match policy.assess(&best.cost, &candidate.cost, candidate.energy_drift) {
                            Verdict::Accept => Attempt::Accepted(candidate),
                            Verdict::Diverged(reason) => Attempt::Diverged(reason),
                        }
                    }
                    Ok(StepOutcome::Accepted(candidate)) => Attempt::Accepted(candidate),
                    Ok(StepOutcome::NoProgress { reason }) => Attempt::Stalled(reason),
                    Err(err) if safe && err.is_numerical_instability() => Attempt::Diverged(err.to_string()),
                    Err(err) => return Err(err),
                };

                match attempt {
                    Attempt::Accepted(candidate) => break Some(candidate),
                    Attempt::Stalled(reason) => {
                        tracing::warn!(iteration, %reason, "no progress");
                        break None;
                    }
                    Attempt::Diverged(reason) => match policy.backoff(optimizer.learning_rate()) {
                        Some(learning_rate) => {
                            tracing::warn!(iteration, %reason, learning_rate, "diverged, backing off");
                            optimizer.set_learning_rate(learning_rate);
                            optimizer.reset();
                            self.tracker.backoff(iteration, learning_rate, &reason);
                        }
                        None => {
                            tracing::warn!(
                                iteration,
                                %reason,
                                retries = policy.retries_used(),
                                "retry budget exhausted, stopping at the best iterate"
                            );
                            status = OptimizationStatus::DivergedEarlyStop;
                            break 'outer;
                        }
                    },
                }
            };

            if let Some(candidate) = accepted {
                current = candidate;
                if current.cost.total < best.cost.total {
                    best = current.clone();
                }
            }
            self.cost_history.push(current.cost);
            totals.push(current.cost.total);
            self.tracker.update(
                iteration,
                current.cost.total,
                current.cost.data,
                current.cost.regularization,
                optimizer.learning_rate(),
            );

            if checker.check_convergence(&totals) {
                tracing::info!(iteration, cost = current.cost.total, "cost stopped improving");
                status = OptimizationStatus::Converged;
                break;
            }
        }
        self.phase = phase.terminate(status);

        // Record the trajectory of the returned momentum.
        let momentum = Tensor::<B, D>::from_inner(best.parameters.clone());
        self.problem.integrator.shoot(
            self.problem.source.clone(),
            momentum.clone(),
            Some(&mut self.trajectory),
        )?;
        self.momentum = Some(momentum);

        let report = OptimizationReport {
            status,
            cost_history: totals,
            initial_cost,
            best_cost: best.cost.total,
            iterations: self.cost_history.len(),
            retries_used: policy.retries_used(),
            final_learning_rate: optimizer.learning_rate(),
        };
        tracing::info!(
            status = %report.status,
            iterations = report.iterations,
            best_cost = report.best_cost,
            retries = report.retries_used,
            "shooting optimization finished"
        );
        self.tracker.complete(report.status.as_str(), report.best_cost);
        self.report = Some(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::{IntegratorConfig, Regime};
    use crate::progress::HistoryCallback;
    use burn::backend::Autodiff;
    use burn::tensor::Int;
    use burn_ndarray::NdArray;
    use metamorph_core::KernelOperator;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn integrator() -> Integrator<TestBackend, 4> {
        let kernel: Arc<dyn KernelOperator<TestBackend, 4>> =
            Arc::new(|field: Tensor<TestBackend, 4>| field.mul_scalar(0.5));
        Integrator::new(
            IntegratorConfig::new().with_n_step(3).with_rho(0.5),
            kernel,
            Regime::Metamorphosis,
        )
        .unwrap()
    }

    fn images() -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 4>) {
        let device = Default::default();
        let source = Tensor::<TestBackend, 1, Int>::arange(0..36, &device)
            .float()
            .div_scalar(36.0)
            .reshape([1, 1, 6, 6]);
        let target = source.clone().add_scalar(0.1);
        (source, target)
    }

    #[test]
    fn test_new_validates_inputs() {
        let (source, target) = images();
        let bad_target = Tensor::<TestBackend, 4>::zeros([1, 1, 6, 5], &Default::default());
        assert!(matches!(
            ShootingController::new(source.clone(), bad_target, integrator(), ShootingConfig::new(0.1), None),
            Err(ShootingError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            ShootingController::new(source, target, integrator(), ShootingConfig::new(-1.0), None),
            Err(ShootingError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_optimize_records_result() {
        let (source, target) = images();
        let mut controller =
            ShootingController::new(source.clone(), target, integrator(), ShootingConfig::new(0.1), None).unwrap();
        let history = Arc::new(HistoryCallback::new());
        controller.add_callback(history.clone());
        assert_eq!(controller.phase(), OptimizationPhase::Initialized);

        let report = controller.optimize(source.zeros_like(), 5, 1.0).unwrap();
        assert!(report.best_cost < report.initial_cost);
        assert!(report.cost_history.len() <= 5);
        assert_eq!(history.get_history().len(), report.cost_history.len());
        assert!(controller.status().is_some());
        assert_eq!(controller.trajectory().n_step(), 3);
        assert_eq!(controller.momentum().map(|m| m.dims()), Some([1, 1, 6, 6]));

        let replay = controller.cost_of(controller.momentum().cloned().unwrap()).unwrap();
        assert!((replay.total - report.best_cost).abs() <= 1e-6 * report.best_cost.abs().max(1.0));
    }

    #[test]
    fn test_optimize_rejects_bad_arguments() {
        let (source, target) = images();
        let mut controller =
            ShootingController::new(source.clone(), target, integrator(), ShootingConfig::new(0.1), None).unwrap();
        assert!(controller.optimize(source.zeros_like(), 0, 1.0).is_err());
        assert!(controller.optimize_safe(source.zeros_like(), 5, -1.0).is_err());
    }

    #[test]
    fn test_unsafe_run_returns_the_lowest_cost_iterate() {
        let (source, target) = images();
        let config = ShootingConfig::new(0.1)
            .with_optimizer_method(OptimizerMethod::GradientDescent)
            .with_patience(100);
        let mut controller = ShootingController::new(source.clone(), target, integrator(), config, None).unwrap();

        // A step this large overshoots, so later iterates are not the best ones.
        let report = controller.optimize(source.zeros_like(), 6, 500.0).unwrap();
        let lowest = report.cost_history.iter().copied().fold(report.initial_cost, f64::min);
        assert_eq!(report.best_cost, lowest);
        assert!(report.best_cost <= report.initial_cost);

        let replay = controller.cost_of(controller.momentum().cloned().unwrap()).unwrap();
        assert!((replay.total - report.best_cost).abs() <= 1e-6 * report.best_cost.abs().max(1.0));
    }
}
