//! Validation utilities for shooting inputs.
//!
//! Everything here runs before integration starts so that malformed inputs fail
//! fast, plus the finiteness checks used while integrating and the convergence
//! test used by the controller.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use crate::error::{Result, ShootingError};

/// Check that `D` is the rank of a batched 2D image or 3D volume.
pub fn validate_rank<const D: usize>() -> Result<()> {
    if D == 4 || D == 5 {
        Ok(())
    } else {
        Err(ShootingError::invalid_input(format!(
            "tensors must be [B, C, H, W] or [B, C, D, H, W], got rank {D}"
        )))
    }
}

/// Validate that two tensors have the same shape.
pub fn validate_same_shape<B: Backend, const D: usize>(
    expected: &Tensor<B, D>,
    actual: &Tensor<B, D>,
) -> Result<()> {
    let (expected, actual) = (expected.dims(), actual.dims());
    if expected != actual {
        return Err(ShootingError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Validate that two tensors live on the same device.
pub fn validate_same_device<B: Backend, const D: usize>(
    what: &str,
    reference: &Tensor<B, D>,
    other: &Tensor<B, D>,
) -> Result<()> {
    let (expected, actual) = (reference.device(), other.device());
    if expected != actual {
        return Err(ShootingError::device_mismatch(format!(
            "{what} is on {actual:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

/// Every spatial axis needs at least two samples for finite differences.
pub fn validate_spatial_extent(dims: &[usize]) -> Result<()> {
    if dims.len() < 3 || dims[0] == 0 || dims[1] == 0 {
        return Err(ShootingError::invalid_input(format!(
            "tensor shape {dims:?} has no batch or channel extent"
        )));
    }
    if let Some(axis) = dims[2..].iter().position(|&n| n < 2) {
        return Err(ShootingError::invalid_input(format!(
            "spatial axis {axis} of shape {dims:?} has fewer than 2 samples"
        )));
    }
    Ok(())
}

/// Validate a coefficient restricted to `[0, 1]`.
pub fn validate_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ShootingError::invalid_configuration(format!(
            "{name} must lie in [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Validate a finite, non-negative coefficient.
pub fn validate_non_negative(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(ShootingError::invalid_configuration(format!(
            "{name} must be finite and non-negative, got {value}"
        )));
    }
    Ok(())
}

/// Validate a finite, strictly positive coefficient.
pub fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ShootingError::invalid_configuration(format!(
            "{name} must be finite and positive, got {value}"
        )));
    }
    Ok(())
}

/// Validate learning rate.
pub fn validate_learning_rate(lr: f64) -> Result<()> {
    if !lr.is_finite() || lr <= 0.0 {
        return Err(ShootingError::invalid_configuration(format!(
            "Learning rate must be positive and finite, got {lr}"
        )));
    }

    if lr < 1e-12 {
        return Err(ShootingError::invalid_configuration(format!(
            "Learning rate too small: {lr}"
        )));
    }

    Ok(())
}

/// Validate iteration count.
pub fn validate_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(ShootingError::invalid_configuration("Iterations must be positive"));
    }

    if iterations > 1_000_000 {
        return Err(ShootingError::invalid_configuration(format!(
            "Iterations too large: {iterations}"
        )));
    }

    Ok(())
}

/// Validate the number of integration steps.
pub fn validate_n_step(n_step: usize) -> Result<()> {
    if n_step == 0 {
        return Err(ShootingError::invalid_configuration(
            "the number of integration steps must be at least 1",
        ));
    }
    Ok(())
}

/// Validate L-BFGS history size.
pub fn validate_lbfgs_history_size(history_size: usize) -> Result<()> {
    if history_size < 1 {
        return Err(ShootingError::invalid_configuration(
            "L-BFGS history size must be at least 1",
        ));
    }

    if history_size > 100 {
        return Err(ShootingError::invalid_configuration(format!(
            "L-BFGS history size too large: {history_size}"
        )));
    }

    Ok(())
}

/// Read a one-element tensor as `f64`.
pub fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.clone().into_scalar().elem::<f64>()
}

/// Whether every element of `tensor` is finite.
///
/// A single NaN or infinity poisons the sum, so one reduction suffices.
pub fn is_finite<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> bool {
    scalar(&tensor.clone().sum()).is_finite()
}

/// Fail with [`ShootingError::NumericalInstability`] if `tensor` holds non-finite values.
pub fn ensure_finite<B: Backend, const D: usize>(tensor: &Tensor<B, D>, what: impl FnOnce() -> String) -> Result<()> {
    if is_finite(tensor) {
        Ok(())
    } else {
        Err(ShootingError::numerical_instability(format!(
            "{} contains non-finite values",
            what()
        )))
    }
}

/// Validate that every element lies in `[0, 1]`.
pub fn validate_mask_range<B: Backend, const D: usize>(what: &str, mask: &Tensor<B, D>) -> Result<()> {
    let min = scalar(&mask.clone().min());
    let max = scalar(&mask.clone().max());
    if !(min >= 0.0 && max <= 1.0) {
        return Err(ShootingError::invalid_input(format!(
            "{what} values must lie in [0, 1], found [{min:.6}, {max:.6}]"
        )));
    }
    Ok(())
}

/// Validate that the channels of `tensor` form a probability distribution at every voxel.
pub fn validate_simplex<B: Backend, const D: usize>(what: &str, tensor: &Tensor<B, D>, tolerance: f64) -> Result<()> {
    let channels = tensor.dims()[1];
    if channels < 2 {
        return Err(ShootingError::invalid_input(format!(
            "{what} needs at least 2 channels to live on the simplex, got {channels}"
        )));
    }
    let min = scalar(&tensor.clone().min());
    if min < -tolerance {
        return Err(ShootingError::invalid_input(format!(
            "{what} has negative entries (min {min:.6})"
        )));
    }
    let deviation = scalar(&tensor.clone().sum_dim(1).sub_scalar(1.0).abs().max());
    if !(deviation <= tolerance) {
        return Err(ShootingError::invalid_input(format!(
            "{what} channels must sum to 1, largest deviation {deviation:.6}"
        )));
    }
    Ok(())
}

/// Check for convergence based on loss history.
#[derive(Debug, Clone)]
pub struct ConvergenceChecker {
    /// Minimum relative improvement to consider converged.
    pub min_improvement: f64,
    /// Number of iterations to check for improvement.
    pub patience: usize,
    /// Minimum absolute loss to consider converged.
    pub min_loss: Option<f64>,
}

impl Default for ConvergenceChecker {
    fn default() -> Self {
        Self {
            min_improvement: 1e-9,
            patience: 10,
            min_loss: None,
        }
    }
}

impl ConvergenceChecker {
    /// Create a new convergence checker.
    pub fn new(min_improvement: f64, patience: usize) -> Self {
        Self {
            min_improvement,
            patience,
            min_loss: None,
        }
    }

    /// Set minimum loss threshold.
    pub fn with_min_loss(mut self, min_loss: f64) -> Self {
        self.min_loss = Some(min_loss);
        self
    }

    /// Returns true once the last `patience` iterations improved less than
    /// `min_improvement` relative to the best loss in that window.
    pub fn check_convergence(&self, loss_history: &[f64]) -> bool {
        let Some(&current_loss) = loss_history.last() else {
            return false;
        };

        if let Some(min_loss) = self.min_loss {
            if current_loss < min_loss {
                return true;
            }
        }

        if loss_history.len() < self.patience + 1 {
            return false;
        }

        let window = &loss_history[loss_history.len() - self.patience - 1..];
        let reference = window[0];
        let best_loss = window.iter().cloned().fold(f64::INFINITY, f64::min);

        let relative_improvement = (reference - best_loss) / (reference.abs() + 1e-10);

        relative_improvement < self.min_improvement
    }
}
