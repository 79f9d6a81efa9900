//! Error types for geodesic shooting.
//!
//! Input problems (shapes, devices, configuration names) are reported before
//! any integration work starts. Non-finite values met during integration are
//! reported as [`ShootingError::NumericalInstability`], which is the only kind
//! the safe-mode controller recovers from.

use metamorph_core::CoreError;
use thiserror::Error;

/// Main error type for shooting operations.
#[derive(Error, Debug)]
pub enum ShootingError {
    /// An input tensor or value is unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A parameter or a configuration name is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Input tensors live on different devices.
    #[error("Device mismatch: {0}")]
    DeviceMismatch(String),

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Error in optimizer operation.
    #[error("Optimizer error: {0}")]
    OptimizerError(String),

    /// Error raised by the numerical core.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for shooting operations.
pub type Result<T> = std::result::Result<T, ShootingError>;

impl ShootingError {
    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a device mismatch error.
    pub fn device_mismatch(msg: impl Into<String>) -> Self {
        Self::DeviceMismatch(msg.into())
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }

    /// Create an optimizer error.
    pub fn optimizer(msg: impl Into<String>) -> Self {
        Self::OptimizerError(msg.into())
    }

    /// Whether safe mode may recover from this error by backing off.
    pub fn is_numerical_instability(&self) -> bool {
        matches!(self, Self::NumericalInstability(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ShootingError::numerical_instability("step 3 produced NaN");
        assert!(matches!(err, ShootingError::NumericalInstability(_)));
        assert!(err.is_numerical_instability());
        assert!(!ShootingError::invalid_input("x").is_numerical_instability());
    }

    #[test]
    fn test_error_display() {
        let err = ShootingError::invalid_configuration("rho must lie in [0, 1], got 1.5");
        assert_eq!(err.to_string(), "Invalid configuration: rho must lie in [0, 1], got 1.5");
    }

    #[test]
    fn test_shape_mismatch() {
        let err = ShootingError::ShapeMismatch {
            expected: vec![1, 1, 32, 32],
            actual: vec![1, 1, 16, 16],
        };
        let err_str = err.to_string();
        assert!(err_str.contains("expected [1, 1, 32, 32]"));
        assert!(err_str.contains("got [1, 1, 16, 16]"));
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: ShootingError = "voxel".parse::<metamorph_core::DxConvention>().unwrap_err().into();
        assert!(err.to_string().starts_with("Unknown coordinate convention"));
    }
}
