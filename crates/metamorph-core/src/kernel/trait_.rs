use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Kernel operator trait.
///
/// Maps a vector field `[B, d, S..]` to its smoothed version of the same shape.
/// Implementations must be pure: the same input always yields the same output,
/// and the operation must stay differentiable through the tensor backend.
pub trait KernelOperator<B: Backend, const D: usize> {
    /// Smooth `field`.
    fn apply(&self, field: Tensor<B, D>) -> Tensor<B, D>;
}

/// Any shape-preserving closure is a kernel operator.
impl<B, F, const D: usize> KernelOperator<B, D> for F
where
    B: Backend,
    F: Fn(Tensor<B, D>) -> Tensor<B, D>,
{
    fn apply(&self, field: Tensor<B, D>) -> Tensor<B, D> {
        self(field)
    }
}
