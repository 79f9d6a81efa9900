//! Optimizers over the initial momentum.

pub mod adadelta;
pub mod evaluation;
pub mod gradient_descent;
pub mod lbfgs;
pub mod trait_;

pub use adadelta::{Adadelta, AdadeltaConfig};
pub use evaluation::{CostBreakdown, Evaluation};
pub use gradient_descent::GradientDescent;
pub use lbfgs::{Lbfgs, LbfgsConfig};
pub use trait_::{Objective, Optimizer, OptimizerMethod, StepOutcome};
