//! Identity grids and shape helpers.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Build the identity map `[batch, d, S1, .., Sd]` in pixel coordinates.
///
/// Channel `i` holds the index along spatial axis `i`, so resampling with this
/// grid returns the input unchanged.
pub fn identity_grid<B: Backend, const D: usize>(
    batch: usize,
    spatial_shape: &[usize],
    device: &B::Device,
) -> Tensor<B, D> {
    let rank = D - 2;
    assert_eq!(
        spatial_shape.len(),
        rank,
        "identity_grid: spatial shape has {} axes but the tensor rank needs {}",
        spatial_shape.len(),
        rank
    );

    let mut full = [1usize; D];
    full[0] = batch;
    full[1] = 1;
    full[2..].copy_from_slice(spatial_shape);

    let components = (0..rank)
        .map(|axis| {
            let n = spatial_shape[axis];
            let mut line_shape = [1usize; D];
            line_shape[axis + 2] = n;
            let line = Tensor::<B, 1, burn::tensor::Int>::arange(0..n as i64, device)
                .float()
                .reshape(line_shape);

            let mut repeats = full;
            repeats[axis + 2] = 1;
            line.repeat(&repeats)
        })
        .collect();

    Tensor::cat(components, 1)
}

/// Spatial extent `[S1, .., Sd]` of a `[B, C, S..]` tensor.
pub fn spatial_shape<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<usize> {
    tensor.dims()[2..].to_vec()
}

/// Repeat singleton axes of `tensor` until it has the shape `dims`.
///
/// Axes that already match are left alone. Used to line up per-step masks
/// `[1, 1, S..]` with batched multi-channel state.
pub fn broadcast_to<B: Backend, const D: usize>(tensor: Tensor<B, D>, dims: [usize; D]) -> Tensor<B, D> {
    let current = tensor.dims();
    if current == dims {
        return tensor;
    }
    let mut repeats = [1usize; D];
    for axis in 0..D {
        if current[axis] != dims[axis] {
            debug_assert_eq!(current[axis], 1, "broadcast_to: axis {axis} is not a singleton");
            repeats[axis] = dims[axis];
        }
    }
    tensor.repeat(&repeats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_identity_grid_values() {
        let device = Default::default();
        let grid = identity_grid::<TestBackend, 4>(2, &[2, 3], &device);
        assert_eq!(grid.dims(), [2, 2, 2, 3]);

        let rows = grid.clone().narrow(0, 1, 1).narrow(1, 0, 1);
        let cols = grid.narrow(0, 1, 1).narrow(1, 1, 1);
        assert_eq!(
            rows.into_data().to_vec::<f32>().unwrap(),
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        );
        assert_eq!(
            cols.into_data().to_vec::<f32>().unwrap(),
            vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]
        );
    }

    #[test]
    fn test_identity_grid_3d_shape() {
        let device = Default::default();
        let grid = identity_grid::<TestBackend, 5>(1, &[2, 3, 4], &device);
        assert_eq!(grid.dims(), [1, 3, 2, 3, 4]);
        let depth_max = grid.narrow(1, 0, 1).max().into_scalar();
        assert_eq!(depth_max, 1.0);
    }

    #[test]
    fn test_broadcast_to() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let expanded = broadcast_to(mask, [3, 2, 2, 2]);
        assert_eq!(expanded.dims(), [3, 2, 2, 2]);
        assert_eq!(expanded.sum().into_scalar(), 24.0);
    }
}
