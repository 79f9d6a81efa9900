//! Error types for the numerical core.

use thiserror::Error;

/// Errors raised while configuring core operators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// The coordinate convention name is not one of the supported ones.
    #[error("Unknown coordinate convention '{0}', expected one of \"pixel\", \"2square\", \"-1to1\"")]
    UnknownConvention(String),

    /// A kernel bandwidth was zero, negative or not finite.
    #[error("Invalid kernel bandwidth: {0}")]
    InvalidBandwidth(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
