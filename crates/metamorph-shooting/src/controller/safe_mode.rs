//! Divergence detection and backoff.
//!
//! An optimization run moves through [`OptimizationPhase`]s. In safe mode each
//! accepted step is checked by a [`SafeModePolicy`]; a rejected step reverts to
//! the best iterate, shrinks the learning rate and retries until the retry
//! budget is spent.

use std::fmt;

use burn::config::Config;

use crate::optimizer::CostBreakdown;

/// Terminal status of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Gradient vanished or the cost stopped improving.
    Converged,
    /// The iteration budget was used up.
    MaxIterReached,
    /// Safe mode ran out of retries and stopped at the best iterate found.
    DivergedEarlyStop,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::MaxIterReached => "max_iter_reached",
            Self::DivergedEarlyStop => "diverged_early_stop",
        }
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a controller across one `optimize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationPhase {
    Initialized,
    Iterating { iteration: usize },
    Terminated(OptimizationStatus),
}

impl OptimizationPhase {
    /// Move to the next iteration.
    pub fn advance(self, iteration: usize) -> Self {
        match self {
            Self::Terminated(_) => self,
            _ => Self::Iterating { iteration },
        }
    }

    pub fn terminate(self, status: OptimizationStatus) -> Self {
        Self::Terminated(status)
    }

    pub fn status(&self) -> Option<OptimizationStatus> {
        match self {
            Self::Terminated(status) => Some(*status),
            _ => None,
        }
    }
}

/// Safe-mode constants.
#[derive(Config, Debug, PartialEq)]
pub struct SafeModeConfig {
    /// Retries allowed per optimization run
    #[config(default = 8)]
    pub max_retries: usize,
    /// Learning-rate multiplier applied on every retry
    #[config(default = 0.5)]
    pub backoff_factor: f64,
    /// Relative cost increase over the best cost that counts as divergence
    #[config(default = 0.0)]
    pub cost_growth_tolerance: f64,
    /// Largest accepted `max_t E_t / E_0` along the trajectory
    #[config(default = 100.0)]
    pub energy_growth_limit: f64,
}

/// Verdict on a candidate iterate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Diverged(String),
}

/// Retry bookkeeping of one safe-mode run.
#[derive(Debug, Clone)]
pub struct SafeModePolicy {
    config: SafeModeConfig,
    retries_used: usize,
}

impl SafeModePolicy {
    pub fn new(config: SafeModeConfig) -> Self {
        Self {
            config,
            retries_used: 0,
        }
    }

    pub fn config(&self) -> &SafeModeConfig {
        &self.config
    }

    pub fn retries_used(&self) -> usize {
        self.retries_used
    }

    /// Judge a candidate against the best accepted cost.
    pub fn assess(&self, best: &CostBreakdown, candidate: &CostBreakdown, energy_drift: f64) -> Verdict {
        if !candidate.total.is_finite() {
            return Verdict::Diverged("cost is not finite".to_string());
        }
        let allowed = best.total + self.config.cost_growth_tolerance * best.total.abs();
        if candidate.total > allowed {
            return Verdict::Diverged(format!(
                "cost increased from {:.6} to {:.6}",
                best.total, candidate.total
            ));
        }
        if !(energy_drift <= self.config.energy_growth_limit) {
            return Verdict::Diverged(format!(
                "trajectory energy grew by a factor {:.3e}",
                energy_drift
            ));
        }
        Verdict::Accept
    }

    /// Consume one retry and return the reduced learning rate, or `None`
    /// once the budget is spent.
    pub fn backoff(&mut self, learning_rate: f64) -> Option<f64> {
        if self.retries_used >= self.config.max_retries {
            return None;
        }
        self.retries_used += 1;
        Some(learning_rate * self.config.backoff_factor)
    }
}
