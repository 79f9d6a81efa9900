//! Geodesic shooting integrator.
//!
//! One [`Integrator`] covers every scheme and regime: the scheme is chosen by
//! [`IntegrationMethod`], the physics by [`Regime`].

pub mod config;
pub mod geodesic;
pub mod regime;
pub mod state;
pub mod trajectory;

pub use config::{IntegrationMethod, IntegratorConfig};
pub use geodesic::Integrator;
pub use regime::{Constraints, IntensityWeight, Regime};
pub use state::{ShootingContext, ShootingState, Shot, StepOutput};
pub use trajectory::Trajectory;
