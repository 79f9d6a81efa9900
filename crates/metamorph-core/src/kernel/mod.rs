//! Smoothing kernels that turn momentum fields into velocity fields.

pub mod gaussian;
pub mod multiscale;
pub mod trait_;

pub use gaussian::GaussianKernel;
pub use multiscale::MultiScaleGaussianKernel;
pub use trait_::KernelOperator;
