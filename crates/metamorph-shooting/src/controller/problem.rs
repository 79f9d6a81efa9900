//! The differentiable cost of one shooting.

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

use crate::data_term::DataTerm;
use crate::error::{Result, ShootingError};
use crate::integrator::{Integrator, Shot};
use crate::optimizer::{CostBreakdown, Evaluation};
use crate::validation;

/// Energies below this are treated as zero when measuring drift.
const ENERGY_FLOOR: f64 = 1e-12;

/// Source, target, integrator and cost model of one registration.
pub struct ShootingProblem<B: AutodiffBackend, const D: usize> {
    pub(crate) source: Tensor<B, D>,
    pub(crate) target: Tensor<B, D>,
    pub(crate) integrator: Integrator<B, D>,
    pub(crate) data_term: Box<dyn DataTerm<B, D>>,
    pub(crate) cost_cst: f64,
    pub(crate) hamiltonian_integration: bool,
}

/// Cost tensors of one shot, still attached to the autodiff graph.
pub struct CostTerms<B: AutodiffBackend> {
    pub total: Tensor<B, 1>,
    pub data: Tensor<B, 1>,
    pub regularization: Tensor<B, 1>,
}

impl<B: AutodiffBackend> CostTerms<B> {
    pub fn breakdown(&self) -> CostBreakdown {
        CostBreakdown {
            total: validation::scalar(&self.total),
            data: validation::scalar(&self.data),
            regularization: validation::scalar(&self.regularization),
        }
    }
}

impl<B: AutodiffBackend, const D: usize> ShootingProblem<B, D> {
    /// `data_term(final_image, target) + cost_cst * R`, where `R` is the
    /// initial energy, or the mean energy along the trajectory when
    /// Hamiltonian integration of the cost is requested.
    pub fn cost(&self, shot: &Shot<B, D>) -> Result<CostTerms<B>> {
        let data = self.data_term.evaluate(shot.final_image.clone(), self.target.clone());
        let regularization = if self.hamiltonian_integration {
            Tensor::cat(shot.energies.clone(), 0).mean()
        } else {
            shot.energies
                .first()
                .cloned()
                .ok_or_else(|| ShootingError::invalid_configuration("integration produced no steps"))?
        };
        let total = data.clone() + regularization.clone().mul_scalar(self.cost_cst);
        Ok(CostTerms {
            total,
            data,
            regularization,
        })
    }

    /// Shoot `parameters`, then return the cost and its gradient.
    pub fn evaluate(&self, parameters: Tensor<B::InnerBackend, D>) -> Result<Evaluation<B::InnerBackend, D>> {
        let momentum = Tensor::<B, D>::from_inner(parameters.clone()).require_grad();
        let shot = self.integrator.shoot(self.source.clone(), momentum.clone(), None)?;
        let terms = self.cost(&shot)?;
        let cost = terms.breakdown();
        if !cost.total.is_finite() {
            return Err(ShootingError::numerical_instability(format!(
                "cost is not finite (data {}, regularization {})",
                cost.data, cost.regularization
            )));
        }
        let energy_drift = energy_drift(&shot.energies);

        let grads = terms.total.backward();
        let gradient = momentum
            .grad(&grads)
            .ok_or_else(|| ShootingError::optimizer("the cost does not depend on the initial momentum"))?;
        validation::ensure_finite(&gradient, || "cost gradient".to_string())?;

        Ok(Evaluation {
            parameters,
            cost,
            gradient,
            energy_drift,
        })
    }
}

/// `max_t E_t / E_0`, or 1 when the initial energy is negligible.
fn energy_drift<B: AutodiffBackend>(energies: &[Tensor<B, 1>]) -> f64 {
    let values: Vec<f64> = energies.iter().map(validation::scalar).collect();
    match values.first() {
        Some(&initial) if initial.abs() > ENERGY_FLOOR => {
            values.iter().fold(f64::NEG_INFINITY, |acc, &e| acc.max(e)) / initial
        }
        _ => 1.0,
    }
}
