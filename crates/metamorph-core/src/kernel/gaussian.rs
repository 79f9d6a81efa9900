use burn::tensor::backend::Backend;
use burn::tensor::ops::ConvOptions;
use burn::tensor::Tensor;

use super::trait_::KernelOperator;
use crate::error::{CoreError, Result};

/// Separable Gaussian smoothing of vector fields.
///
/// Convolves every channel of a `[B, d, S..]` field with a normalised Gaussian
/// along each spatial axis in turn. Bandwidths are given in pixels, one per
/// spatial axis; a single value is reused for every axis. Borders are zero
/// padded, so the kernel also damps velocities near the image boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    sigmas: Vec<f64>,
    max_kernel_width: usize,
}

impl GaussianKernel {
    /// Create a Gaussian kernel with per-axis standard deviations (pixels).
    pub fn new(sigmas: Vec<f64>) -> Result<Self> {
        if sigmas.is_empty() {
            return Err(CoreError::InvalidBandwidth("at least one sigma is required".to_string()));
        }
        if let Some(bad) = sigmas.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(CoreError::InvalidBandwidth(format!(
                "sigma must be positive and finite, got {bad}"
            )));
        }
        Ok(Self {
            sigmas,
            max_kernel_width: 65,
        })
    }

    /// Same bandwidth on every axis.
    pub fn isotropic(sigma: f64) -> Result<Self> {
        Self::new(vec![sigma])
    }

    /// Set the maximum kernel width (radius * 2 + 1).
    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = width.max(1);
        self
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    /// Smooth a `[B, C, S..]` tensor.
    pub fn apply_tensor<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let device = input.device();
        let mut data = input;

        for axis in 0..D - 2 {
            let sigma = self.sigmas.get(axis).copied().unwrap_or(self.sigmas[0]);
            let radius = (3.0 * sigma).ceil() as usize;
            let width = (2 * radius + 1).min(self.max_kernel_width);
            let actual_radius = (width - 1) / 2;

            let weights = gaussian_weights(sigma, actual_radius);
            let kernel = Tensor::<B, 1>::from_floats(weights.as_slice(), &device);
            data = convolve_1d(data, kernel, axis + 2);
        }
        data
    }
}

impl<B: Backend, const D: usize> KernelOperator<B, D> for GaussianKernel {
    fn apply(&self, field: Tensor<B, D>) -> Tensor<B, D> {
        self.apply_tensor(field)
    }
}

fn gaussian_weights(sigma: f64, radius: usize) -> Vec<f32> {
    let two_sigma2 = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| (v / sum) as f32).collect()
}

fn convolve_1d<B: Backend, const D: usize>(input: Tensor<B, D>, kernel: Tensor<B, 1>, dim: usize) -> Tensor<B, D> {
    let dims = input.dims();

    // Move the target axis last.
    let mut permutation = [0isize; D];
    let mut slot = 0;
    for i in 0..D {
        if i != dim {
            permutation[slot] = i as isize;
            slot += 1;
        }
    }
    permutation[D - 1] = dim as isize;

    let mut permuted_dims = [0usize; D];
    for (i, &p) in permutation.iter().enumerate() {
        permuted_dims[i] = dims[p as usize];
    }

    let length = dims[dim];
    let lines: usize = dims.iter().product::<usize>() / length.max(1);
    let flat = input.permute(permutation).reshape([lines, 1, length]);

    let kernel_size = kernel.dims()[0];
    let padding = kernel_size / 2;
    let options = ConvOptions::new([1], [padding], [1], 1);
    let smoothed = burn::tensor::module::conv1d(flat, kernel.reshape([1, 1, kernel_size]), None, options);

    // Undo the permutation.
    let mut inverse = [0isize; D];
    for (i, &p) in permutation.iter().enumerate() {
        inverse[p as usize] = i as isize;
    }
    smoothed.reshape(permuted_dims).permute(inverse)
}
