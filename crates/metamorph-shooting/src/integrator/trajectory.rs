//! Recorded trajectory of one integration.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use metamorph_core::DxConvention;

/// Growable record of every state of one integration.
///
/// Owned by a single controller, reset at the start of each recording pass
/// and filled with detached tensors. Images and momenta hold `n_step + 1`
/// entries (initial state included); velocities, deformations and energies
/// hold one entry per step.
#[derive(Debug, Clone)]
pub struct Trajectory<B: Backend, const D: usize> {
    images: Vec<Tensor<B, D>>,
    momenta: Vec<Tensor<B, D>>,
    velocities: Vec<Tensor<B, D>>,
    deformations: Vec<Tensor<B, D>>,
    energies: Vec<f64>,
    dx_convention: DxConvention,
}

impl<B: Backend, const D: usize> Default for Trajectory<B, D> {
    fn default() -> Self {
        Self::new(DxConvention::Pixel)
    }
}

impl<B: Backend, const D: usize> Trajectory<B, D> {
    pub fn new(dx_convention: DxConvention) -> Self {
        Self {
            images: Vec::new(),
            momenta: Vec::new(),
            velocities: Vec::new(),
            deformations: Vec::new(),
            energies: Vec::new(),
            dx_convention,
        }
    }

    /// Drop every recorded state, keeping the allocations.
    pub fn reset(&mut self) {
        self.images.clear();
        self.momenta.clear();
        self.velocities.clear();
        self.deformations.clear();
        self.energies.clear();
    }

    pub(crate) fn set_convention(&mut self, dx_convention: DxConvention) {
        self.dx_convention = dx_convention;
    }

    pub(crate) fn record_initial(&mut self, image: Tensor<B, D>, momentum: Tensor<B, D>) {
        self.images.push(image.detach());
        self.momenta.push(momentum.detach());
    }

    pub(crate) fn record_step(
        &mut self,
        image: Tensor<B, D>,
        momentum: Tensor<B, D>,
        velocity: Tensor<B, D>,
        deformation: Tensor<B, D>,
        energy: f64,
    ) {
        self.images.push(image.detach());
        self.momenta.push(momentum.detach());
        self.velocities.push(velocity.detach());
        self.deformations.push(deformation.detach());
        self.energies.push(energy);
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Number of recorded steps.
    pub fn n_step(&self) -> usize {
        self.velocities.len()
    }

    pub fn dx_convention(&self) -> DxConvention {
        self.dx_convention
    }

    /// Images `I_0 .. I_T`.
    pub fn images(&self) -> &[Tensor<B, D>] {
        &self.images
    }

    /// Momenta `z_0 .. z_T`.
    pub fn momenta(&self) -> &[Tensor<B, D>] {
        &self.momenta
    }

    /// Velocities `v_0 .. v_{T-1}`.
    pub fn velocities(&self) -> &[Tensor<B, D>] {
        &self.velocities
    }

    /// Deformations `phi_1 .. phi_T` in pixel coordinates.
    pub fn deformations(&self) -> &[Tensor<B, D>] {
        &self.deformations
    }

    /// Step energies `E_0 .. E_{T-1}`.
    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    pub fn final_image(&self) -> Option<Tensor<B, D>> {
        self.images.last().cloned()
    }

    /// Final backward map in pixel coordinates.
    pub fn final_deformation(&self) -> Option<Tensor<B, D>> {
        self.deformations.last().cloned()
    }

    /// Final backward map in the coordinates of the integration's convention.
    pub fn final_deformation_physical(&self) -> Option<Tensor<B, D>> {
        self.final_deformation()
            .map(|deformation| self.dx_convention.pixel_to_physical(deformation))
    }

    /// Images of steps `0..T` concatenated along the batch axis. Rows map to
    /// steps only for a batch-1 trajectory.
    pub fn image_stack(&self) -> Option<Tensor<B, D>> {
        let steps = self.n_step();
        stack(&self.images[..steps.min(self.images.len())])
    }

    /// Momenta of steps `0..T` concatenated along the batch axis.
    pub fn momentum_stack(&self) -> Option<Tensor<B, D>> {
        let steps = self.n_step();
        stack(&self.momenta[..steps.min(self.momenta.len())])
    }

    /// Velocities of every step concatenated along the batch axis.
    pub fn velocity_stack(&self) -> Option<Tensor<B, D>> {
        stack(&self.velocities)
    }
}

fn stack<B: Backend, const D: usize>(tensors: &[Tensor<B, D>]) -> Option<Tensor<B, D>> {
    if tensors.is_empty() {
        None
    } else {
        Some(Tensor::cat(tensors.to_vec(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_record_and_reset() {
        let device = Default::default();
        let mut trajectory = Trajectory::<TestBackend, 4>::new(DxConvention::MinusOneToOne);
        assert!(trajectory.is_empty());
        assert!(trajectory.image_stack().is_none());

        let image = Tensor::<TestBackend, 4>::zeros([1, 1, 3, 3], &device);
        let field = Tensor::<TestBackend, 4>::zeros([1, 2, 3, 3], &device);
        trajectory.record_initial(image.clone(), image.clone());
        for step in 0..4 {
            trajectory.record_step(
                image.clone().add_scalar(step as f64 + 1.0),
                image.clone(),
                field.clone(),
                field.clone(),
                step as f64,
            );
        }

        assert_eq!(trajectory.n_step(), 4);
        assert_eq!(trajectory.images().len(), 5);
        assert_eq!(trajectory.energies(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(trajectory.image_stack().unwrap().dims(), [4, 1, 3, 3]);
        assert_eq!(trajectory.velocity_stack().unwrap().dims(), [4, 2, 3, 3]);
        assert_eq!(trajectory.final_image().unwrap().max().into_scalar(), 4.0);

        // Pixel 0 on a 3-long axis maps to -1.
        let physical = trajectory.final_deformation_physical().unwrap();
        assert_eq!(physical.min().into_scalar(), -1.0);

        trajectory.reset();
        assert!(trajectory.is_empty());
        assert_eq!(trajectory.n_step(), 0);
    }
}
