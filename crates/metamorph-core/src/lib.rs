//! Numerical building blocks for geodesic shooting.
//!
//! Every operator here works on `burn` tensors laid out as `[B, C, S1, .., Sd]`
//! (images, momenta, masks) or `[B, d, S1, .., Sd]` (vector fields whose channel
//! `i` is the component along spatial axis `i`). The tensor rank `D` is a const
//! generic, so the same code serves 2D images (`D = 4`) and 3D volumes (`D = 5`).

pub mod convention;
pub mod differential;
pub mod error;
pub mod grid;
pub mod interpolation;
pub mod kernel;

pub use convention::DxConvention;
pub use error::{CoreError, Result};
pub use interpolation::LinearSampler;
pub use kernel::{GaussianKernel, KernelOperator, MultiScaleGaussianKernel};
