//! Sum of squared differences.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::DataTerm;

/// Sum of squared differences: `0.5 * sum((I - T)^2)`.
///
/// This is the default data term of every shooting variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssd;

impl Ssd {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend, const D: usize> DataTerm<B, D> for Ssd {
    fn evaluate(&self, candidate: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
        (candidate - target).powf_scalar(2.0).sum().mul_scalar(0.5)
    }

    fn name(&self) -> &'static str {
        "ssd"
    }
}

/// Mean squared difference: `0.5 * mean((I - T)^2)`.
///
/// Independent of the image size, which keeps `cost_cst` comparable across
/// resolutions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedSsd;

impl NormalizedSsd {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend, const D: usize> DataTerm<B, D> for NormalizedSsd {
    fn evaluate(&self, candidate: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
        (candidate - target).powf_scalar(2.0).mean().mul_scalar(0.5)
    }

    fn name(&self) -> &'static str {
        "normalized_ssd"
    }
}
