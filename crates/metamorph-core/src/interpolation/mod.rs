//! Resampling of images and fields at arbitrary positions.

pub mod linear;

pub use linear::LinearSampler;
