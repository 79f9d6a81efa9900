use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Cost of one shooting, split into its parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    /// `data + cost_cst * regularization`.
    pub total: f64,
    /// Data attachment of the final image.
    pub data: f64,
    /// Regularisation energy before scaling by `cost_cst`.
    pub regularization: f64,
}

/// Everything an optimizer learns from evaluating one set of parameters.
#[derive(Debug, Clone)]
pub struct Evaluation<B: Backend, const D: usize> {
    /// The initial momentum that was shot.
    pub parameters: Tensor<B, D>,
    pub cost: CostBreakdown,
    /// Gradient of the total cost with respect to `parameters`.
    pub gradient: Tensor<B, D>,
    /// `max_t E_t / E_0` along the trajectory (1 when `E_0` is negligible).
    pub energy_drift: f64,
}
