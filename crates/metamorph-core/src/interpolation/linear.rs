//! Multilinear resampling with border clamping.
//!
//! Bilinear for 2D grids, trilinear for 3D grids. Every channel of the input is
//! sampled at the same positions, which is what semi-Lagrangian transport of
//! images, momenta and deformation maps needs.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Multilinear sampler over `[B, C, S..]` tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSampler;

impl LinearSampler {
    /// Create a new sampler.
    pub fn new() -> Self {
        Self
    }

    /// Sample `data` `[B, C, S..]` at pixel `positions` `[B, d, S'..]`.
    ///
    /// Channel `i` of `positions` is the (fractional) index along spatial axis
    /// `i`. Positions outside the grid are clamped to the border, so the value
    /// at the nearest edge is replicated. NaN positions read the first sample
    /// of the axis. Sampling at integer positions returns the stored values
    /// exactly.
    pub fn sample<B: Backend, const D: usize>(&self, data: Tensor<B, D>, positions: Tensor<B, D>) -> Tensor<B, D> {
        let data_dims = data.dims();
        let position_dims = positions.dims();
        let rank = D - 2;
        let [batch, channels] = [data_dims[0], data_dims[1]];

        let n_in: usize = data_dims[2..].iter().product();
        let n_out: usize = position_dims[2..].iter().product();
        let flat_data = data.reshape([batch, channels, n_in]);
        let flat_positions = positions.reshape([batch, rank, n_out]);

        // Row-major strides of the input grid.
        let mut strides = vec![1i64; rank];
        for axis in (0..rank.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * data_dims[axis + 3] as i64;
        }

        let mut lower = Vec::with_capacity(rank);
        let mut upper = Vec::with_capacity(rank);
        let mut fractions = Vec::with_capacity(rank);
        for axis in 0..rank {
            let extent = data_dims[axis + 2];
            let max_index = (extent - 1) as f64;
            let coord = flat_positions.clone().narrow(1, axis, 1);
            let coord = coord.clone().mask_fill(coord.is_nan(), 0.0).clamp(0.0, max_index);
            let floor = coord.clone().floor();
            fractions.push(coord - floor.clone());

            let lo: Tensor<B, 3, Int> = floor.clone().int();
            let hi: Tensor<B, 3, Int> = floor.add_scalar(1.0).clamp(0.0, max_index).int();
            lower.push(lo.mul_scalar(strides[axis]));
            upper.push(hi.mul_scalar(strides[axis]));
        }

        let mut result: Option<Tensor<B, 3>> = None;
        for corner in 0..(1usize << rank) {
            let mut index: Option<Tensor<B, 3, Int>> = None;
            let mut weight: Option<Tensor<B, 3>> = None;
            for axis in 0..rank {
                let use_upper = (corner >> (rank - 1 - axis)) & 1 == 1;
                let (offset, w) = if use_upper {
                    (upper[axis].clone(), fractions[axis].clone())
                } else {
                    (lower[axis].clone(), fractions[axis].clone().neg().add_scalar(1.0))
                };
                index = Some(match index {
                    Some(acc) => acc + offset,
                    None => offset,
                });
                weight = Some(match weight {
                    Some(acc) => acc * w,
                    None => w,
                });
            }
            let (Some(index), Some(weight)) = (index, weight) else {
                continue;
            };

            let index = index.repeat(&[1, channels, 1]);
            let values = flat_data.clone().gather(2, index);
            let contribution = values * weight.repeat(&[1, channels, 1]);
            result = Some(match result {
                Some(acc) => acc + contribution,
                None => contribution,
            });
        }

        let mut out_dims = position_dims;
        out_dims[1] = channels;
        match result {
            Some(values) => values.reshape(out_dims),
            None => flat_data.reshape(data_dims),
        }
    }
}
