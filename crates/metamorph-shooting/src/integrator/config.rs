use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use metamorph_core::DxConvention;
use serde::{Deserialize, Serialize};

use crate::error::ShootingError;

/// Advection scheme used for every integration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Backward-traced resampling of image, momentum and deformation.
    #[default]
    SemiLagrangian,
    /// Semi-Lagrangian transport, but the image is always resampled from the
    /// source through the composed deformation, so interfaces are interpolated
    /// once instead of once per step.
    Sharp,
    /// Symplectic Euler update of the Eulerian Hamiltonian equations.
    Hamiltonian,
}

impl IntegrationMethod {
    /// Name accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SemiLagrangian => "semiLagrangian",
            Self::Sharp => "sharp",
            Self::Hamiltonian => "Hamiltonian",
        }
    }

    /// `sharp = true` overrides whatever method was named.
    pub fn resolve(self, sharp: bool) -> Self {
        if sharp {
            Self::Sharp
        } else {
            self
        }
    }
}

impl FromStr for IntegrationMethod {
    type Err = ShootingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semiLagrangian" => Ok(Self::SemiLagrangian),
            "sharp" => Ok(Self::Sharp),
            "Hamiltonian" => Ok(Self::Hamiltonian),
            other => Err(ShootingError::invalid_configuration(format!(
                "unknown integration method '{other}', expected \"semiLagrangian\", \"sharp\" or \"Hamiltonian\""
            ))),
        }
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of an [`super::Integrator`].
#[derive(Config, Debug, PartialEq)]
pub struct IntegratorConfig {
    /// Advection scheme.
    #[config(default = "IntegrationMethod::SemiLagrangian")]
    pub method: IntegrationMethod,
    /// Number of time steps. Ignored when the regime carries per-step stacks,
    /// whose length then sets the horizon.
    #[config(default = "10")]
    pub n_step: usize,
    /// Balance between deformation (1) and intensity change (0).
    #[config(default = "1.0")]
    pub rho: f64,
    /// Coordinate convention of the finite differences.
    #[config(default = "DxConvention::Pixel")]
    pub dx_convention: DxConvention,
}
