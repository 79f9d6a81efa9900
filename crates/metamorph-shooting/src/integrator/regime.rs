//! Physical regimes: how the intensity residual is weighted, how the velocity
//! is constrained and how the state is kept admissible after each step.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use metamorph_core::grid::broadcast_to;

use crate::error::{Result, ShootingError};

const SIMPLEX_EPSILON: f64 = 1e-8;

/// Per-step stacks and coefficients of the constrained regime.
///
/// Stacks are indexed by time step along their first axis: residual and
/// orienting masks are `[T, 1, S..]`, orienting velocities `[T, d, S..]`.
#[derive(Debug, Clone)]
pub struct Constraints<B: Backend, const D: usize> {
    residual_mask: Option<Tensor<B, D>>,
    orienting: Option<(Tensor<B, D>, Tensor<B, D>)>,
    gamma: f64,
    mu: f64,
}

impl<B: Backend, const D: usize> Constraints<B, D> {
    /// No stacks yet; `gamma` pulls the velocity toward the orienting field,
    /// `mu` damps the residual where the orienting mask is active.
    pub fn new(gamma: f64, mu: f64) -> Self {
        Self {
            residual_mask: None,
            orienting: None,
            gamma,
            mu,
        }
    }

    /// Restrict the intensity residual with a `[T, 1, S..]` mask stack.
    pub fn with_residual_mask(mut self, mask: Tensor<B, D>) -> Self {
        self.residual_mask = Some(mask);
        self
    }

    /// Blend the velocity toward `field` (`[T, d, S..]`) where `mask` (`[T, 1, S..]`) is active.
    pub fn with_orienting(mut self, mask: Tensor<B, D>, field: Tensor<B, D>) -> Self {
        self.orienting = Some((mask, field));
        self
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn residual_mask(&self) -> Option<&Tensor<B, D>> {
        self.residual_mask.as_ref()
    }

    /// Orienting `(mask, field)` stacks.
    pub fn orienting(&self) -> Option<(&Tensor<B, D>, &Tensor<B, D>)> {
        self.orienting.as_ref().map(|(mask, field)| (mask, field))
    }

    /// Move every stack to `device`.
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            residual_mask: self.residual_mask.map(|m| m.to_device(device)),
            orienting: self
                .orienting
                .map(|(mask, field)| (mask.to_device(device), field.to_device(device))),
            gamma: self.gamma,
            mu: self.mu,
        }
    }

    /// Number of time steps covered by the stacks, if any.
    pub fn horizon(&self) -> Result<Option<usize>> {
        let mut lengths = Vec::new();
        if let Some(mask) = &self.residual_mask {
            lengths.push(("residual mask", mask.dims()[0]));
        }
        if let Some((mask, field)) = &self.orienting {
            lengths.push(("orienting mask", mask.dims()[0]));
            lengths.push(("orienting field", field.dims()[0]));
        }
        let Some(&(_, horizon)) = lengths.first() else {
            return Ok(None);
        };
        if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != horizon) {
            return Err(ShootingError::invalid_input(format!(
                "{name} has {len} time steps but the other stacks have {horizon}"
            )));
        }
        Ok(Some(horizon))
    }

    fn validate(&self, dims: [usize; D]) -> Result<()> {
        let spatial = &dims[2..];
        let rank = D - 2;
        let check = |name: &str, stack: &Tensor<B, D>, channels: usize| -> Result<()> {
            let stack_dims = stack.dims();
            if stack_dims[1] != channels || &stack_dims[2..] != spatial {
                let mut expected = stack_dims.to_vec();
                expected[1] = channels;
                expected[2..].copy_from_slice(spatial);
                return Err(ShootingError::invalid_input(format!(
                    "{name} must be [T, {channels}, {spatial:?}], got {stack_dims:?} (expected {expected:?})"
                )));
            }
            Ok(())
        };
        if let Some(mask) = &self.residual_mask {
            check("residual mask", mask, 1)?;
        }
        if let Some((mask, field)) = &self.orienting {
            check("orienting mask", mask, 1)?;
            check("orienting field", field, rank)?;
        }
        Ok(())
    }

    fn intensity_weight(&self, step: usize, rho: f64) -> IntensityWeight<B, D> {
        let residual = self.residual_mask.as_ref().map(|m| m.clone().narrow(0, step, 1));
        let damping = self
            .orienting
            .as_ref()
            .filter(|_| self.mu > 0.0)
            .map(|(mask, _)| mask.clone().narrow(0, step, 1).mul_scalar(self.mu).add_scalar(1.0));

        match (residual, damping) {
            (None, None) => IntensityWeight::Uniform(1.0 - rho),
            (Some(w), None) => IntensityWeight::Field(w.mul_scalar(1.0 - rho)),
            (Some(w), Some(d)) => IntensityWeight::Field(w.mul_scalar(1.0 - rho) / d),
            (None, Some(d)) => IntensityWeight::Field(d.ones_like().mul_scalar(1.0 - rho) / d),
        }
    }

    fn blend_velocity(&self, step: usize, free: Tensor<B, D>) -> Tensor<B, D> {
        let Some((mask, field)) = &self.orienting else {
            return free;
        };
        let dims = free.dims();
        let pull = broadcast_to(mask.clone().narrow(0, step, 1).mul_scalar(self.gamma), dims);
        let target = broadcast_to(field.clone().narrow(0, step, 1), dims);
        (free + pull.clone() * target) / pull.add_scalar(1.0)
    }
}

/// Weight `c_t` of the intensity residual in the image update and the energy.
#[derive(Debug, Clone)]
pub enum IntensityWeight<B: Backend, const D: usize> {
    /// Same coefficient everywhere.
    Uniform(f64),
    /// Per-voxel (and possibly per-channel) coefficient.
    Field(Tensor<B, D>),
}

impl<B: Backend, const D: usize> IntensityWeight<B, D> {
    /// `c_t * momentum`.
    pub fn apply(&self, momentum: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Uniform(c) => momentum.mul_scalar(*c),
            Self::Field(weight) => {
                let dims = momentum.dims();
                momentum * broadcast_to(weight.clone(), dims)
            }
        }
    }
}

/// Physical regime of an integrator.
#[derive(Debug, Clone)]
pub enum Regime<B: Backend, const D: usize> {
    /// LDDMM (`rho = 1`) and plain Metamorphosis.
    Metamorphosis,
    /// Weighted, oriented and constrained Metamorphosis.
    Constrained(Constraints<B, D>),
    /// Two channels, image then mask. The mask is only transported and gates
    /// where the image may change intensity.
    Joined,
    /// Channels are a probability distribution per voxel. The state holds the
    /// square root of the probabilities.
    Simplex,
}

impl<B: Backend, const D: usize> Regime<B, D> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Metamorphosis => "metamorphosis",
            Self::Constrained(_) => "constrained",
            Self::Joined => "joined",
            Self::Simplex => "simplex",
        }
    }

    /// Number of steps imposed by per-step stacks.
    pub fn horizon(&self) -> Result<Option<usize>> {
        match self {
            Self::Constrained(constraints) => constraints.horizon(),
            _ => Ok(None),
        }
    }

    /// Check that the regime can act on state of shape `dims`.
    pub fn validate(&self, dims: [usize; D]) -> Result<()> {
        match self {
            Self::Metamorphosis => Ok(()),
            Self::Constrained(constraints) => constraints.validate(dims),
            Self::Joined if dims[1] != 2 => Err(ShootingError::invalid_input(format!(
                "joined metamorphosis needs [B, 2, ..] (image, mask), got {dims:?}"
            ))),
            Self::Simplex if dims[1] < 2 => Err(ShootingError::invalid_input(format!(
                "simplex metamorphosis needs at least 2 channels, got {dims:?}"
            ))),
            Self::Joined | Self::Simplex => Ok(()),
        }
    }

    /// Map a source image into the integrated state.
    pub fn encode(&self, image: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Simplex => image.clamp_min(0.0).sqrt(),
            _ => image,
        }
    }

    /// Map integrated state back to an image.
    pub fn decode(&self, state: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Simplex => state.clone() * state,
            _ => state,
        }
    }

    /// Intensity weight for step `step` given the current state image.
    pub fn intensity_weight(&self, step: usize, image: &Tensor<B, D>, rho: f64) -> IntensityWeight<B, D> {
        match self {
            Self::Metamorphosis | Self::Simplex => IntensityWeight::Uniform(1.0 - rho),
            Self::Constrained(constraints) => constraints.intensity_weight(step, rho),
            Self::Joined => {
                let gate = image.clone().narrow(1, 1, 1).clamp(0.0, 1.0).mul_scalar(1.0 - rho);
                let frozen = gate.zeros_like();
                IntensityWeight::Field(Tensor::cat(vec![gate, frozen], 1))
            }
        }
    }

    /// Apply velocity constraints to the free velocity of step `step`.
    pub fn constrain_velocity(&self, step: usize, free: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Constrained(constraints) => constraints.blend_velocity(step, free),
            _ => free,
        }
    }

    /// Bring the state image back to its admissible set.
    pub fn normalize(&self, image: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Joined => {
                let intensity = image.clone().narrow(1, 0, 1);
                let mask = image.narrow(1, 1, 1).clamp(0.0, 1.0);
                Tensor::cat(vec![intensity, mask], 1)
            }
            Self::Simplex => {
                let dims = image.dims();
                let q = image.clamp_min(0.0);
                let norm = (q.clone() * q.clone()).sum_dim(1).add_scalar(SIMPLEX_EPSILON).sqrt();
                q / broadcast_to(norm, dims)
            }
            Self::Metamorphosis | Self::Constrained(_) => image,
        }
    }
}
