use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::gaussian::GaussianKernel;
use super::trait_::KernelOperator;
use crate::error::{CoreError, Result};

/// Average of isotropic Gaussian kernels at several bandwidths.
///
/// Mixing scales lets large structures move coherently while fine details can
/// still be matched.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiScaleGaussianKernel {
    kernels: Vec<GaussianKernel>,
}

impl MultiScaleGaussianKernel {
    pub fn new(sigmas: &[f64]) -> Result<Self> {
        if sigmas.is_empty() {
            return Err(CoreError::InvalidBandwidth(
                "a multi-scale kernel needs at least one bandwidth".to_string(),
            ));
        }
        let kernels = sigmas
            .iter()
            .map(|&sigma| GaussianKernel::isotropic(sigma))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { kernels })
    }

    pub fn scales(&self) -> usize {
        self.kernels.len()
    }
}

impl<B: Backend, const D: usize> KernelOperator<B, D> for MultiScaleGaussianKernel {
    fn apply(&self, field: Tensor<B, D>) -> Tensor<B, D> {
        let weight = 1.0 / self.kernels.len() as f64;
        let mut total = field.zeros_like();
        for kernel in &self.kernels {
            total = total + kernel.apply_tensor(field.clone()).mul_scalar(weight);
        }
        total
    }
}
