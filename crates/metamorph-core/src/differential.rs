//! Finite-difference operators on `[B, C, S..]` tensors.
//!
//! Derivatives are central in the interior and one-sided on the first and last
//! slice of each axis. Spacing is expressed in the units of the active
//! [`crate::DxConvention`].

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::grid::broadcast_to;

/// Derivative of `tensor` along tensor axis `dim` with grid spacing `spacing`.
pub fn finite_difference<B: Backend, const D: usize>(tensor: Tensor<B, D>, dim: usize, spacing: f64) -> Tensor<B, D> {
    let n = tensor.dims()[dim];
    if n < 2 {
        return tensor.zeros_like();
    }

    let first = (tensor.clone().narrow(dim, 1, 1) - tensor.clone().narrow(dim, 0, 1)).div_scalar(spacing);
    let last = (tensor.clone().narrow(dim, n - 1, 1) - tensor.clone().narrow(dim, n - 2, 1)).div_scalar(spacing);
    if n == 2 {
        return Tensor::cat(vec![first, last], dim);
    }

    let interior = (tensor.clone().narrow(dim, 2, n - 2) - tensor.narrow(dim, 0, n - 2)).div_scalar(2.0 * spacing);
    Tensor::cat(vec![first, interior, last], dim)
}

/// Spatial gradient of every channel, one tensor `[B, C, S..]` per spatial axis.
pub fn spatial_gradient<B: Backend, const D: usize>(tensor: Tensor<B, D>, spacing: &[f64]) -> Vec<Tensor<B, D>> {
    (0..D - 2)
        .map(|axis| finite_difference(tensor.clone(), axis + 2, spacing[axis]))
        .collect()
}

/// Divergence of a vector field `[B, d, S..]`, returned as `[B, 1, S..]`.
pub fn divergence<B: Backend, const D: usize>(field: Tensor<B, D>, spacing: &[f64]) -> Tensor<B, D> {
    let mut total = finite_difference(field.clone().narrow(1, 0, 1), 2, spacing[0]);
    for axis in 1..D - 2 {
        total = total + finite_difference(field.clone().narrow(1, axis, 1), axis + 2, spacing[axis]);
    }
    total
}

/// Divergence of the flux `density * velocity`, per channel of `density`.
///
/// `density` is `[B, C, S..]`, `velocity` is `[B, d, S..]`; the result has the
/// shape of `density`.
pub fn flux_divergence<B: Backend, const D: usize>(
    density: Tensor<B, D>,
    velocity: Tensor<B, D>,
    spacing: &[f64],
) -> Tensor<B, D> {
    let dims = density.dims();
    let mut total: Option<Tensor<B, D>> = None;
    for axis in 0..D - 2 {
        let component = broadcast_to(velocity.clone().narrow(1, axis, 1), dims);
        let flux = finite_difference(density.clone() * component, axis + 2, spacing[axis]);
        total = Some(match total {
            Some(acc) => acc + flux,
            None => flux,
        });
    }
    total.unwrap_or_else(|| density.zeros_like())
}

/// Directional derivative `v . grad(image)` for every channel of `image`.
pub fn advection<B: Backend, const D: usize>(image: Tensor<B, D>, velocity: Tensor<B, D>, spacing: &[f64]) -> Tensor<B, D> {
    let dims = image.dims();
    let mut total: Option<Tensor<B, D>> = None;
    for (axis, gradient) in spatial_gradient(image.clone(), spacing).into_iter().enumerate() {
        let component = broadcast_to(velocity.clone().narrow(1, axis, 1), dims);
        let term = gradient * component;
        total = Some(match total {
            Some(acc) => acc + term,
            None => term,
        });
    }
    total.unwrap_or_else(|| image.zeros_like())
}

/// Momentum vector field `p = sum_c z_c * grad(I_c)` as `[B, d, S..]`.
///
/// This is the field the kernel smooths into a velocity: the image gradient
/// weighted by the scalar momentum, summed over channels.
pub fn momentum_field<B: Backend, const D: usize>(
    image: Tensor<B, D>,
    momentum: Tensor<B, D>,
    spacing: &[f64],
) -> Tensor<B, D> {
    let components = spatial_gradient(image, spacing)
        .into_iter()
        .map(|gradient| (gradient * momentum.clone()).sum_dim(1))
        .collect();
    Tensor::cat(components, 1)
}
