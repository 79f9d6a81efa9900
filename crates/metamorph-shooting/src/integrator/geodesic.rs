//! Forward integration of the geodesic equations.

use std::sync::Arc;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use metamorph_core::grid::{broadcast_to, identity_grid};
use metamorph_core::{differential, KernelOperator, LinearSampler};

use super::config::{IntegrationMethod, IntegratorConfig};
use super::regime::{IntensityWeight, Regime};
use super::state::{ShootingContext, ShootingState, Shot, StepOutput};
use super::trajectory::Trajectory;
use crate::error::{Result, ShootingError};
use crate::validation;

/// Geodesic shooting integrator.
///
/// Immutable once built: advances `(image, momentum, deformation)` for a fixed
/// number of steps with the configured scheme, kernel and regime. The velocity
/// of every step is `v = -rho * K(sum_c z_c grad I_c)`, possibly blended with an
/// orienting field by the regime.
#[derive(Clone)]
pub struct Integrator<B: Backend, const D: usize> {
    config: IntegratorConfig,
    n_step: usize,
    kernel: Arc<dyn KernelOperator<B, D>>,
    regime: Regime<B, D>,
    sampler: LinearSampler,
}

impl<B: Backend, const D: usize> std::fmt::Debug for Integrator<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrator")
            .field("method", &self.config.method)
            .field("n_step", &self.n_step)
            .field("rho", &self.config.rho)
            .field("dx_convention", &self.config.dx_convention)
            .field("regime", &self.regime.name())
            .finish()
    }
}

impl<B: Backend, const D: usize> Integrator<B, D> {
    /// Build an integrator.
    ///
    /// When the regime carries per-step stacks, their length sets the number of
    /// steps and `config.n_step` is ignored.
    pub fn new(config: IntegratorConfig, kernel: Arc<dyn KernelOperator<B, D>>, regime: Regime<B, D>) -> Result<Self> {
        validation::validate_rank::<D>()?;
        validation::validate_unit_interval("rho", config.rho)?;
        if let Regime::Constrained(constraints) = &regime {
            validation::validate_non_negative("gamma", constraints.gamma())?;
            validation::validate_non_negative("mu", constraints.mu())?;
        }

        let n_step = match regime.horizon()? {
            Some(horizon) => {
                if horizon != config.n_step {
                    tracing::debug!(horizon, requested = config.n_step, "n_step follows the mask horizon");
                }
                horizon
            }
            None => config.n_step,
        };
        validation::validate_n_step(n_step)?;

        Ok(Self {
            config,
            n_step,
            kernel,
            regime,
            sampler: LinearSampler::new(),
        })
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn method(&self) -> IntegrationMethod {
        self.config.method
    }

    pub fn n_step(&self) -> usize {
        self.n_step
    }

    pub fn rho(&self) -> f64 {
        self.config.rho
    }

    pub fn regime(&self) -> &Regime<B, D> {
        &self.regime
    }

    /// Check that a source and an initial momentum can be integrated.
    pub fn check_compatible(&self, source: &Tensor<B, D>, momentum: &Tensor<B, D>) -> Result<()> {
        validation::validate_spatial_extent(&source.dims())?;
        validation::validate_same_shape(source, momentum)?;
        validation::validate_same_device("initial momentum", source, momentum)?;
        self.regime.validate(source.dims())?;
        validation::ensure_finite(source, || "source".to_string())?;
        validation::ensure_finite(momentum, || "initial momentum".to_string())?;

        let device = source.device();
        let stacks: Vec<&Tensor<B, D>> = match &self.regime {
            Regime::Constrained(constraints) => constraints
                .residual_mask()
                .into_iter()
                .chain(constraints.orienting().into_iter().flat_map(|(mask, field)| [mask, field]))
                .collect(),
            _ => Vec::new(),
        };
        if stacks.iter().any(|stack| stack.device() != device) {
            return Err(ShootingError::device_mismatch(
                "constraint stacks are not on the source device",
            ));
        }
        for stack in stacks {
            validation::ensure_finite(stack, || "constraint stack".to_string())?;
        }
        Ok(())
    }

    /// Prepare the shared context and initial state of an integration.
    pub fn initialize(&self, source: Tensor<B, D>, momentum: Tensor<B, D>) -> (ShootingContext<B, D>, ShootingState<B, D>) {
        let dims = source.dims();
        let device = source.device();
        let spatial = &dims[2..];
        let spacing = self.config.dx_convention.spacing(spatial);
        let identity = identity_grid::<B, D>(dims[0], spatial, &device);

        let encoded = self.regime.encode(source);
        let residual = (self.config.method == IntegrationMethod::Sharp).then(|| encoded.zeros_like());
        let state = ShootingState {
            step: 0,
            image: encoded.clone(),
            momentum,
            deformation: identity.clone(),
            residual,
        };
        let context = ShootingContext {
            source: encoded,
            identity,
            spacing,
            dt: 1.0 / self.n_step as f64,
        };
        (context, state)
    }

    /// Advance `state` by one step.
    pub fn step(&self, context: &ShootingContext<B, D>, state: ShootingState<B, D>) -> Result<StepOutput<B, D>> {
        let ShootingState {
            step,
            image,
            momentum,
            deformation,
            residual,
        } = state;
        let dt = context.dt;
        let weight = self.regime.intensity_weight(step, &image, self.config.rho);
        let (velocity, energy) = self.velocity_and_energy(context, step, &image, &momentum, Some(&weight));
        validation::ensure_finite(&velocity, || format!("velocity at step {}", step + 1))?;

        let (image, momentum, deformation, residual, velocity) = match self.config.method {
            IntegrationMethod::SemiLagrangian => {
                let positions = self.backward_positions(context, &velocity);
                let source_term = weight.apply(momentum.clone()).mul_scalar(dt);
                let image = self.sampler.sample(image, positions.clone()) + source_term;
                let momentum = self.transport_momentum(context, momentum, &velocity, positions.clone());
                let deformation = self.sampler.sample(deformation, positions);
                (image, momentum, deformation, residual, velocity)
            }
            IntegrationMethod::Sharp => {
                let positions = self.backward_positions(context, &velocity);
                let deformation = self.sampler.sample(deformation, positions.clone());
                let accumulated = residual.unwrap_or_else(|| image.zeros_like());
                let residual = self.sampler.sample(accumulated, positions.clone())
                    + weight.apply(momentum.clone()).mul_scalar(dt);
                let image = self.sampler.sample(context.source.clone(), deformation.clone()) + residual.clone();
                let momentum = self.transport_momentum(context, momentum, &velocity, positions);
                (image, momentum, deformation, Some(residual), velocity)
            }
            IntegrationMethod::Hamiltonian => {
                let flux = differential::flux_divergence(momentum.clone(), velocity, &context.spacing);
                let momentum = momentum - flux.mul_scalar(dt);
                let (velocity, _) = self.velocity_and_energy(context, step, &image, &momentum, None);
                validation::ensure_finite(&velocity, || format!("velocity at step {}", step + 1))?;

                let transport = differential::advection(image.clone(), velocity.clone(), &context.spacing);
                let image = image - transport.mul_scalar(dt) + weight.apply(momentum.clone()).mul_scalar(dt);
                let positions = self.backward_positions(context, &velocity);
                let deformation = self.sampler.sample(deformation, positions);
                (image, momentum, deformation, residual, velocity)
            }
        };

        let image = self.regime.normalize(image);
        validation::ensure_finite(&image, || format!("image after step {}", step + 1))?;
        validation::ensure_finite(&momentum, || format!("momentum after step {}", step + 1))?;

        Ok(StepOutput {
            state: ShootingState {
                step: step + 1,
                image,
                momentum,
                deformation,
                residual,
            },
            velocity,
            energy,
        })
    }

    /// Integrate `n_step` steps from `source` with initial `momentum`.
    ///
    /// When `recorder` is given it is reset and receives every state.
    pub fn shoot(
        &self,
        source: Tensor<B, D>,
        momentum: Tensor<B, D>,
        mut recorder: Option<&mut Trajectory<B, D>>,
    ) -> Result<Shot<B, D>> {
        self.check_compatible(&source, &momentum)?;
        let (context, mut state) = self.initialize(source, momentum);

        if let Some(trajectory) = recorder.as_deref_mut() {
            trajectory.reset();
            trajectory.set_convention(self.config.dx_convention);
            trajectory.record_initial(self.regime.decode(state.image.clone()), state.momentum.clone());
        }

        let mut energies = Vec::with_capacity(self.n_step);
        for _ in 0..self.n_step {
            let output = self.step(&context, state)?;
            if let Some(trajectory) = recorder.as_deref_mut() {
                trajectory.record_step(
                    self.regime.decode(output.state.image.clone()),
                    output.state.momentum.clone(),
                    output.velocity.clone(),
                    output.state.deformation.clone(),
                    validation::scalar(&output.energy),
                );
            }
            energies.push(output.energy);
            state = output.state;
        }

        Ok(Shot {
            final_image: self.regime.decode(state.image.clone()),
            final_state: state,
            energies,
        })
    }

    fn velocity_and_energy(
        &self,
        context: &ShootingContext<B, D>,
        step: usize,
        image: &Tensor<B, D>,
        momentum: &Tensor<B, D>,
        weight: Option<&IntensityWeight<B, D>>,
    ) -> (Tensor<B, D>, Tensor<B, 1>) {
        let rho = self.config.rho;
        let field = differential::momentum_field(image.clone(), momentum.clone(), &context.spacing);
        let smoothed = self.kernel.apply(field.clone());
        let velocity = self.regime.constrain_velocity(step, smoothed.clone().mul_scalar(-rho));

        let kinetic = (smoothed * field).sum().mul_scalar(0.5 * rho);
        let energy = match weight {
            Some(weight) => kinetic + (weight.apply(momentum.clone()) * momentum.clone()).sum().mul_scalar(0.5),
            None => kinetic,
        };
        (velocity, energy)
    }

    /// Backward-traced positions `x - dt * v / h` in pixel units.
    fn backward_positions(&self, context: &ShootingContext<B, D>, velocity: &Tensor<B, D>) -> Tensor<B, D> {
        let displacement = (0..D - 2)
            .map(|axis| {
                velocity
                    .clone()
                    .narrow(1, axis, 1)
                    .mul_scalar(context.dt / context.spacing[axis])
            })
            .collect();
        context.identity.clone() - Tensor::cat(displacement, 1)
    }

    /// `z' = (z o psi) * (1 - dt * div v)`.
    fn transport_momentum(
        &self,
        context: &ShootingContext<B, D>,
        momentum: Tensor<B, D>,
        velocity: &Tensor<B, D>,
        positions: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let transported = self.sampler.sample(momentum, positions);
        let compression = differential::divergence(velocity.clone(), &context.spacing)
            .mul_scalar(-context.dt)
            .add_scalar(1.0);
        let dims = transported.dims();
        transported * broadcast_to(compression, dims)
    }
}
