//! One entry point per physical regime.
//!
//! Every factory resolves the initial momentum, assembles the matching
//! [`Integrator`] and [`ShootingController`], runs the optimization (safe or
//! not) and hands back the controller holding the result.

use std::sync::Arc;
use std::time::Instant;

use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use metamorph_core::{DxConvention, GaussianKernel, KernelOperator};

use crate::controller::{ShootingConfig, ShootingController};
use crate::data_term::DataTerm;
use crate::error::ShootingError;
use crate::integrator::{Constraints, IntegrationMethod, Integrator, IntegratorConfig, Regime, Trajectory};
use crate::optimizer::OptimizerMethod;
use crate::progress::ConsoleProgressCallback;
use crate::validation;

/// Largest per-pixel deviation from the simplex accepted for simplex inputs.
const SIMPLEX_TOLERANCE: f64 = 1e-3;

/// Initial momentum or residual: a scalar broadcast to the source's shape, or
/// an explicit tensor.
#[derive(Debug, Clone)]
pub enum InitialValue<B: AutodiffBackend, const D: usize> {
    Scalar(f64),
    Tensor(Tensor<B, D>),
}

impl<B: AutodiffBackend, const D: usize> From<f64> for InitialValue<B, D> {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl<B: AutodiffBackend, const D: usize> From<f32> for InitialValue<B, D> {
    fn from(value: f32) -> Self {
        Self::Scalar(value as f64)
    }
}

impl<B: AutodiffBackend, const D: usize> From<i32> for InitialValue<B, D> {
    fn from(value: i32) -> Self {
        Self::Scalar(value as f64)
    }
}

impl<B: AutodiffBackend, const D: usize> From<Tensor<B, D>> for InitialValue<B, D> {
    fn from(value: Tensor<B, D>) -> Self {
        Self::Tensor(value)
    }
}

impl<B: AutodiffBackend, const D: usize> InitialValue<B, D> {
    /// Full-shaped tensor on the source's device, with gradient tracking enabled.
    pub fn resolve(self, source: &Tensor<B, D>) -> crate::error::Result<Tensor<B, D>> {
        let tensor = match self {
            Self::Scalar(value) => {
                if !value.is_finite() {
                    return Err(ShootingError::invalid_input(format!(
                        "initial momentum must be finite, got {value}"
                    )));
                }
                Tensor::full(source.shape(), value, &source.device())
            }
            Self::Tensor(tensor) => {
                validation::validate_same_shape(source, &tensor)?;
                validation::validate_same_device("initial momentum", source, &tensor)?;
                if !validation::is_finite(&tensor) {
                    return Err(ShootingError::invalid_input("initial momentum contains non-finite values"));
                }
                tensor.detach()
            }
        };
        Ok(tensor.require_grad())
    }
}

/// Settings of [`lddmm`].
#[derive(Config, Debug)]
pub struct LddmmConfig {
    pub cost_cst: f64,
    pub integration_steps: usize,
    pub n_iter: usize,
    pub grad_coef: f64,
    #[config(default = false)]
    pub sharp: bool,
    #[config(default = false)]
    pub safe_mode: bool,
    #[config(default = "IntegrationMethod::SemiLagrangian")]
    pub integration_method: IntegrationMethod,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
    #[config(default = "OptimizerMethod::Lbfgs")]
    pub optimizer_method: OptimizerMethod,
    #[config(default = false)]
    pub hamiltonian_integration: bool,
}

/// Settings of [`metamorphosis`].
#[derive(Config, Debug)]
pub struct MetamorphosisConfig {
    /// Deformation / intensity balance, 1 is pure deformation.
    pub rho: f64,
    pub cost_cst: f64,
    pub integration_steps: usize,
    pub n_iter: usize,
    pub grad_coef: f64,
    #[config(default = false)]
    pub sharp: bool,
    #[config(default = true)]
    pub safe_mode: bool,
    #[config(default = "IntegrationMethod::SemiLagrangian")]
    pub integration_method: IntegrationMethod,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
    #[config(default = "OptimizerMethod::Lbfgs")]
    pub optimizer_method: OptimizerMethod,
    #[config(default = false)]
    pub hamiltonian_integration: bool,
}

/// Settings of [`weighted_metamorphosis`]. The number of steps is the length
/// of the residual mask stack.
#[derive(Config, Debug)]
pub struct WeightedMetamorphosisConfig {
    pub cost_cst: f64,
    pub n_iter: usize,
    pub grad_coef: f64,
    #[config(default = 0.5)]
    pub rho: f64,
    #[config(default = false)]
    pub sharp: bool,
    #[config(default = true)]
    pub safe_mode: bool,
    #[config(default = "OptimizerMethod::Adadelta")]
    pub optimizer_method: OptimizerMethod,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
}

/// Settings of [`oriented_metamorphosis`].
#[derive(Config, Debug)]
pub struct OrientedMetamorphosisConfig {
    /// Residual damping where the orienting mask is active.
    pub mu: f64,
    pub rho: f64,
    /// Strength of the pull toward the orienting velocity.
    pub gamma: f64,
    /// Bandwidth (pixels) of the Gaussian kernel.
    pub sigma: f64,
    pub cost_cst: f64,
    pub n_iter: usize,
    pub grad_coef: f64,
    #[config(default = false)]
    pub safe_mode: bool,
    #[config(default = "OptimizerMethod::Adadelta")]
    pub optimizer_method: OptimizerMethod,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
}

/// Settings of [`constrained_metamorphosis`].
#[derive(Config, Debug)]
pub struct ConstrainedMetamorphosisConfig {
    pub cost_cst: f64,
    pub n_iter: usize,
    pub grad_coef: f64,
    #[config(default = 0.5)]
    pub rho: f64,
    #[config(default = 1.0)]
    pub gamma: f64,
    #[config(default = 0.0)]
    pub mu: f64,
    #[config(default = false)]
    pub sharp: bool,
    #[config(default = false)]
    pub safe_mode: bool,
    #[config(default = "OptimizerMethod::Lbfgs")]
    pub optimizer_method: OptimizerMethod,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
}

/// Settings of [`joined_metamorphosis`].
#[derive(Config, Debug)]
pub struct JoinedMetamorphosisConfig {
    pub rho: f64,
    #[config(default = 10)]
    pub n_step: usize,
    #[config(default = 1000)]
    pub n_iter: usize,
    #[config(default = 2.0)]
    pub grad_coef: f64,
    #[config(default = 0.001)]
    pub cost_cst: f64,
    #[config(default = false)]
    pub plot: bool,
    #[config(default = false)]
    pub safe_mode: bool,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
}

/// Settings of [`simplex_metamorphosis`].
#[derive(Config, Debug)]
pub struct SimplexMetamorphosisConfig {
    pub rho: f64,
    #[config(default = 10)]
    pub n_step: usize,
    #[config(default = 1000)]
    pub n_iter: usize,
    #[config(default = 2.0)]
    pub grad_coef: f64,
    #[config(default = 0.001)]
    pub cost_cst: f64,
    #[config(default = false)]
    pub plot: bool,
    #[config(default = false)]
    pub safe_mode: bool,
    /// Regularise with the mean energy along the trajectory.
    #[config(default = false)]
    pub ham: bool,
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
}

struct Run {
    n_iter: usize,
    grad_coef: f64,
    safe_mode: bool,
    plot: bool,
}

fn optimize<B: AutodiffBackend, const D: usize>(
    variant: &'static str,
    mut controller: ShootingController<B, D>,
    initial: Tensor<B, D>,
    run: Run,
) -> crate::error::Result<ShootingController<B, D>> {
    let start = Instant::now();
    if run.plot {
        controller.add_callback(Arc::new(ConsoleProgressCallback::default()));
    }
    let report = if run.safe_mode {
        controller.optimize_safe(initial, run.n_iter, run.grad_coef)?
    } else {
        controller.optimize(initial, run.n_iter, run.grad_coef)?
    };
    tracing::info!(
        variant,
        status = %report.status,
        best_cost = report.best_cost,
        elapsed_s = start.elapsed().as_secs_f64(),
        "registration finished"
    );
    Ok(controller)
}

/// Pure deformation (`rho = 1`).
#[tracing::instrument(skip_all, fields(n_iter = config.n_iter))]
pub fn lddmm<B: AutodiffBackend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
    momentum: impl Into<InitialValue<B, D>>,
    kernel: Arc<dyn KernelOperator<B, D>>,
    config: &LddmmConfig,
    data_term: Option<Box<dyn DataTerm<B, D>>>,
) -> crate::error::Result<ShootingController<B, D>> {
    let momentum = momentum.into().resolve(&source)?;
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_method(config.integration_method.resolve(config.sharp))
            .with_n_step(config.integration_steps)
            .with_rho(1.0)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Metamorphosis,
    )?;
    let settings = ShootingConfig::new(config.cost_cst)
        .with_optimizer_method(config.optimizer_method)
        .with_hamiltonian_integration(config.hamiltonian_integration);
    let controller = ShootingController::new(source, target, integrator, settings, data_term)?;
    optimize(
        "lddmm",
        controller,
        momentum,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: false,
        },
    )
}

/// Deformation plus intensity residual, balanced by `rho`.
#[tracing::instrument(skip_all, fields(rho = config.rho, n_iter = config.n_iter))]
pub fn metamorphosis<B: AutodiffBackend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
    momentum: impl Into<InitialValue<B, D>>,
    kernel: Arc<dyn KernelOperator<B, D>>,
    config: &MetamorphosisConfig,
    data_term: Option<Box<dyn DataTerm<B, D>>>,
) -> crate::error::Result<ShootingController<B, D>> {
    let momentum = momentum.into().resolve(&source)?;
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_method(config.integration_method.resolve(config.sharp))
            .with_n_step(config.integration_steps)
            .with_rho(config.rho)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Metamorphosis,
    )?;
    let settings = ShootingConfig::new(config.cost_cst)
        .with_optimizer_method(config.optimizer_method)
        .with_hamiltonian_integration(config.hamiltonian_integration);
    let controller = ShootingController::new(source, target, integrator, settings, data_term)?;
    optimize(
        "metamorphosis",
        controller,
        momentum,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: false,
        },
    )
}

/// Metamorphosis whose residual is weighted per step by `residual_mask`
/// (`[T, 1, S..]`, values in `[0, 1]`).
#[tracing::instrument(skip_all, fields(n_iter = config.n_iter))]
pub fn weighted_metamorphosis<B: AutodiffBackend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
    residual: impl Into<InitialValue<B, D>>,
    residual_mask: Tensor<B, D>,
    kernel: Arc<dyn KernelOperator<B, D>>,
    config: &WeightedMetamorphosisConfig,
    data_term: Option<Box<dyn DataTerm<B, D>>>,
) -> crate::error::Result<ShootingController<B, D>> {
    let residual = residual.into().resolve(&source)?;
    validation::validate_mask_range("residual mask", &residual_mask)?;
    let device = source.device();
    let constraints = Constraints::new(0.0, 0.0).with_residual_mask(residual_mask.to_device(&device));
    let horizon = constraints.horizon()?.unwrap_or(1);
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_method(IntegrationMethod::SemiLagrangian.resolve(config.sharp))
            .with_n_step(horizon)
            .with_rho(config.rho)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Constrained(constraints),
    )?;
    let settings = ShootingConfig::new(config.cost_cst).with_optimizer_method(config.optimizer_method);
    let controller = ShootingController::new(source, target, integrator, settings, data_term)?;
    optimize(
        "weighted_metamorphosis",
        controller,
        residual,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: false,
        },
    )
}

/// Metamorphosis oriented by a previous registration: the images and
/// velocities recorded in `orienting` become the orienting mask and field.
/// Both `source` and `orienting` must have batch size 1.
#[tracing::instrument(skip_all, fields(mu = config.mu, gamma = config.gamma, rho = config.rho))]
pub fn oriented_metamorphosis<B: AutodiffBackend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
    residual: impl Into<InitialValue<B, D>>,
    orienting: &Trajectory<B, D>,
    config: &OrientedMetamorphosisConfig,
) -> crate::error::Result<ShootingController<B, D>> {
    let residual = residual.into().resolve(&source)?;
    // The stacks put steps on the batch axis, so a single image is needed.
    let orienting_batch = orienting.images().first().map(|image| image.dims()[0]);
    if source.dims()[0] != 1 || orienting_batch.is_some_and(|batch| batch != 1) {
        return Err(ShootingError::invalid_input(format!(
            "oriented metamorphosis needs batch size 1, got source batch {} and orienting batch {}",
            source.dims()[0],
            orienting_batch.unwrap_or(0)
        )));
    }
    let device = source.device();
    let (mask, field) = match (orienting.image_stack(), orienting.velocity_stack()) {
        (Some(mask), Some(field)) => (mask.to_device(&device), field.to_device(&device)),
        _ => {
            return Err(ShootingError::invalid_input(
                "orienting trajectory is empty, integrate it with recording first",
            ))
        }
    };
    let kernel: Arc<dyn KernelOperator<B, D>> = Arc::new(GaussianKernel::isotropic(config.sigma)?);
    let constraints = Constraints::new(config.gamma, config.mu).with_orienting(mask, field);
    let horizon = constraints.horizon()?.unwrap_or(1);
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_n_step(horizon)
            .with_rho(config.rho)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Constrained(constraints),
    )?;
    let settings = ShootingConfig::new(config.cost_cst).with_optimizer_method(config.optimizer_method);
    let controller = ShootingController::new(source, target, integrator, settings, None)?;
    optimize(
        "oriented_metamorphosis",
        controller,
        residual,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: false,
        },
    )
}

/// Metamorphosis with both a residual mask stack `mask_w` and an orienting
/// field `field_orienting` active where `mask_o` is.
#[tracing::instrument(skip_all, fields(gamma = config.gamma, mu = config.mu))]
#[allow(clippy::too_many_arguments)]
pub fn constrained_metamorphosis<B: AutodiffBackend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
    residual: impl Into<InitialValue<B, D>>,
    mask_w: Tensor<B, D>,
    field_orienting: Tensor<B, D>,
    mask_o: Tensor<B, D>,
    kernel: Arc<dyn KernelOperator<B, D>>,
    config: &ConstrainedMetamorphosisConfig,
) -> crate::error::Result<ShootingController<B, D>> {
    let residual = residual.into().resolve(&source)?;
    validation::validate_mask_range("residual mask", &mask_w)?;
    validation::validate_mask_range("orienting mask", &mask_o)?;
    let device = source.device();
    let constraints = Constraints::new(config.gamma, config.mu)
        .with_residual_mask(mask_w)
        .with_orienting(mask_o, field_orienting)
        .to_device(&device);
    let horizon = constraints.horizon()?.unwrap_or(1);
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_method(IntegrationMethod::SemiLagrangian.resolve(config.sharp))
            .with_n_step(horizon)
            .with_rho(config.rho)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Constrained(constraints),
    )?;
    let settings = ShootingConfig::new(config.cost_cst).with_optimizer_method(config.optimizer_method);
    let controller = ShootingController::new(source, target, integrator, settings, None)?;
    optimize(
        "constrained_metamorphosis",
        controller,
        residual,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: false,
        },
    )
}

/// Register an image together with a mask. Image and mask are stacked into a
/// two-channel state; the residual acts on the image only where the mask is.
#[tracing::instrument(skip_all, fields(rho = config.rho, n_step = config.n_step))]
#[allow(clippy::too_many_arguments)]
pub fn joined_metamorphosis<B: AutodiffBackend, const D: usize>(
    source_image: Tensor<B, D>,
    target_image: Tensor<B, D>,
    source_mask: Tensor<B, D>,
    target_mask: Tensor<B, D>,
    momentum: impl Into<InitialValue<B, D>>,
    kernel: Arc<dyn KernelOperator<B, D>>,
    config: &JoinedMetamorphosisConfig,
    data_term: Option<Box<dyn DataTerm<B, D>>>,
) -> crate::error::Result<ShootingController<B, D>> {
    for (name, tensor) in [
        ("source image", &source_image),
        ("target image", &target_image),
        ("source mask", &source_mask),
        ("target mask", &target_mask),
    ] {
        if tensor.dims()[1] != 1 {
            return Err(ShootingError::invalid_input(format!(
                "{name} must have a single channel, got {:?}",
                tensor.dims()
            )));
        }
    }
    validation::validate_same_shape(&source_image, &source_mask)?;
    validation::validate_same_shape(&target_image, &target_mask)?;
    validation::validate_same_device("source mask", &source_image, &source_mask)?;
    validation::validate_same_device("target mask", &target_image, &target_mask)?;
    validation::validate_mask_range("source mask", &source_mask)?;
    validation::validate_mask_range("target mask", &target_mask)?;

    let source = Tensor::cat(vec![source_image, source_mask], 1);
    let target = Tensor::cat(vec![target_image, target_mask], 1);
    let momentum = momentum.into().resolve(&source)?;
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_n_step(config.n_step)
            .with_rho(config.rho)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Joined,
    )?;
    let settings = ShootingConfig::new(config.cost_cst);
    let controller = ShootingController::new(source, target, integrator, settings, data_term)?;
    optimize(
        "joined_metamorphosis",
        controller,
        momentum,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: config.plot,
        },
    )
}

/// Metamorphosis of multi-channel images living on the probability simplex
/// (channels non-negative, summing to one at every pixel).
#[tracing::instrument(skip_all, fields(rho = config.rho, n_step = config.n_step))]
pub fn simplex_metamorphosis<B: AutodiffBackend, const D: usize>(
    source: Tensor<B, D>,
    target: Tensor<B, D>,
    momentum: impl Into<InitialValue<B, D>>,
    kernel: Arc<dyn KernelOperator<B, D>>,
    config: &SimplexMetamorphosisConfig,
    data_term: Option<Box<dyn DataTerm<B, D>>>,
) -> crate::error::Result<ShootingController<B, D>> {
    validation::validate_simplex("source", &source, SIMPLEX_TOLERANCE)?;
    validation::validate_simplex("target", &target, SIMPLEX_TOLERANCE)?;
    let momentum = momentum.into().resolve(&source)?;
    let integrator = Integrator::new(
        IntegratorConfig::new()
            .with_n_step(config.n_step)
            .with_rho(config.rho)
            .with_dx_convention(config.dx_convention),
        kernel,
        Regime::Simplex,
    )?;
    let settings = ShootingConfig::new(config.cost_cst).with_hamiltonian_integration(config.ham);
    let controller = ShootingController::new(source, target, integrator, settings, data_term)?;
    optimize(
        "simplex_metamorphosis",
        controller,
        momentum,
        Run {
            n_iter: config.n_iter,
            grad_coef: config.grad_coef,
            safe_mode: config.safe_mode,
            plot: config.plot,
        },
    )
}
