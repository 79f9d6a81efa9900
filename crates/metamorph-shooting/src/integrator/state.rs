use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// State advanced by one integration step.
#[derive(Debug, Clone)]
pub struct ShootingState<B: Backend, const D: usize> {
    /// Index of the next step to take.
    pub step: usize,
    /// Current image in state space (square roots of probabilities for the simplex regime).
    pub image: Tensor<B, D>,
    /// Scalar momentum, same shape as `image`.
    pub momentum: Tensor<B, D>,
    /// Cumulative backward map in pixel coordinates, `[B, d, S..]`.
    pub deformation: Tensor<B, D>,
    /// Accumulated intensity residual, transported along the flow (sharp scheme only).
    pub residual: Option<Tensor<B, D>>,
}

/// Quantities shared by every step of one integration.
#[derive(Debug, Clone)]
pub struct ShootingContext<B: Backend, const D: usize> {
    /// Encoded source image, resampled by the sharp scheme.
    pub source: Tensor<B, D>,
    /// Identity map `[B, d, S..]`.
    pub identity: Tensor<B, D>,
    /// Grid spacing of every spatial axis.
    pub spacing: Vec<f64>,
    /// Time step `1 / n_step`.
    pub dt: f64,
}

/// Result of one step.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend, const D: usize> {
    pub state: ShootingState<B, D>,
    /// Velocity used to transport the state during the step.
    pub velocity: Tensor<B, D>,
    /// Energy of the step, a one-element tensor.
    pub energy: Tensor<B, 1>,
}

/// Result of a full integration.
#[derive(Debug, Clone)]
pub struct Shot<B: Backend, const D: usize> {
    /// Final image in image space.
    pub final_image: Tensor<B, D>,
    pub final_state: ShootingState<B, D>,
    /// Energy of every step, in order.
    pub energies: Vec<Tensor<B, 1>>,
}
