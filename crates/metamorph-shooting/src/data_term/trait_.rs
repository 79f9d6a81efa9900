use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Data term trait for measuring dissimilarity between the shot image and the target.
///
/// # Type Parameters
/// * `B` - The tensor backend
/// * `D` - The tensor rank (`[B, C, S..]`)
pub trait DataTerm<B: Backend, const D: usize> {
    /// Scalar cost of `candidate` against `target`.
    ///
    /// Must be differentiable with respect to `candidate`.
    fn evaluate(&self, candidate: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1>;

    /// Get the name of this data term.
    fn name(&self) -> &'static str;
}
