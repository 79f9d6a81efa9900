//! Optimization of the initial momentum.

mod problem;
mod safe_mode;
mod shooting;

pub use problem::{CostTerms, ShootingProblem};
pub use safe_mode::{OptimizationPhase, OptimizationStatus, SafeModeConfig, SafeModePolicy, Verdict};
pub use shooting::{OptimizationReport, ShootingConfig, ShootingController};
