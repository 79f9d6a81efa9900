pub mod controller;
pub mod data_term;
pub mod error;
pub mod integrator;
pub mod optimizer;
pub mod progress;
pub mod validation;
pub mod variants;

pub use controller::{OptimizationReport, OptimizationStatus, SafeModeConfig, ShootingConfig, ShootingController};
pub use data_term::{DataTerm, Ncc, NormalizedSsd, Ssd};
pub use error::{Result, ShootingError};
pub use integrator::{Constraints, IntegrationMethod, Integrator, IntegratorConfig, Regime, Trajectory};
pub use optimizer::{CostBreakdown, OptimizerMethod};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use validation::ConvergenceChecker;
pub use variants::{
    constrained_metamorphosis, joined_metamorphosis, lddmm, metamorphosis, oriented_metamorphosis,
    simplex_metamorphosis, weighted_metamorphosis, ConstrainedMetamorphosisConfig, InitialValue,
    JoinedMetamorphosisConfig, LddmmConfig, MetamorphosisConfig, OrientedMetamorphosisConfig,
    SimplexMetamorphosisConfig, WeightedMetamorphosisConfig,
};
