//! Normalized cross correlation.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::DataTerm;

/// Global normalized cross correlation, returned as `1 - NCC`.
///
/// NCC = sum((I - mean(I)) * (T - mean(T))) / sqrt(sum((I - mean(I))^2) * sum((T - mean(T))^2))
///
/// Range: [0, 2], where 0 is perfect positive correlation. Insensitive to
/// affine intensity changes between the images.
#[derive(Debug, Clone, Copy)]
pub struct Ncc {
    epsilon: f64,
}

impl Ncc {
    pub fn new() -> Self {
        Self { epsilon: 1e-8 }
    }

    /// Regulariser added under the square root.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

impl Default for Ncc {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend, const D: usize> DataTerm<B, D> for Ncc {
    fn evaluate(&self, candidate: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
        let n = candidate.dims().iter().product::<usize>();
        let c = candidate.reshape([n]);
        let t = target.reshape([n]);

        let c = c.clone() - c.mean().repeat(&[n]);
        let t = t.clone() - t.mean().repeat(&[n]);

        let numerator = (c.clone() * t.clone()).sum();
        let denominator = (c.powf_scalar(2.0).sum() * t.powf_scalar(2.0).sum())
            .add_scalar(self.epsilon)
            .sqrt();

        (numerator / denominator).neg().add_scalar(1.0)
    }

    fn name(&self) -> &'static str {
        "ncc"
    }
}
