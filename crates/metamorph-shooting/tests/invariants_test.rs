use std::sync::Arc;

use burn::backend::Autodiff;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use metamorph_core::grid::identity_grid;
use metamorph_core::{GaussianKernel, KernelOperator};
use metamorph_shooting::{
    constrained_metamorphosis, lddmm, metamorphosis, ConstrainedMetamorphosisConfig, Constraints, InitialValue,
    IntegrationMethod, Integrator, IntegratorConfig, LddmmConfig, MetamorphosisConfig, Regime, ShootingConfig,
    ShootingController, ShootingError, Trajectory,
};
use proptest::prelude::*;

type B = Autodiff<NdArray<f32>>;

const N: usize = 12;

fn blob(cx: f32, cy: f32, sigma: f32, scale: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(N * N);
    for y in 0..N {
        for x in 0..N {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            data.push(scale * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
        }
    }
    data
}

fn image(channels: Vec<Vec<f32>>) -> Tensor<B, 4> {
    let c = channels.len();
    let data: Vec<f32> = channels.into_iter().flatten().collect();
    Tensor::from_data(TensorData::new(data, [1, c, N, N]), &Default::default())
}

fn kernel() -> Arc<dyn KernelOperator<B, 4>> {
    Arc::new(GaussianKernel::isotropic(1.5).unwrap())
}

fn max_abs_diff(a: Tensor<B, 4>, b: Tensor<B, 4>) -> f32 {
    (a - b).abs().max().into_scalar()
}

fn simplex_source() -> Tensor<B, 4> {
    let a = blob(5.0, 5.0, 2.0, 0.6);
    let b = blob(7.0, 6.0, 2.0, 0.3);
    let rest: Vec<f32> = a.iter().zip(&b).map(|(x, y)| 1.0 - x - y).collect();
    image(vec![a, b, rest])
}

fn regimes() -> Vec<(&'static str, Regime<B, 4>, Tensor<B, 4>)> {
    let device = Default::default();
    let steps = 4;
    let constraints = Constraints::new(1.0, 0.5)
        .with_residual_mask(Tensor::ones([steps, 1, N, N], &device))
        .with_orienting(Tensor::zeros([steps, 1, N, N], &device), Tensor::ones([steps, 2, N, N], &device));
    vec![
        ("metamorphosis", Regime::Metamorphosis, image(vec![blob(5.0, 6.0, 2.0, 1.0)])),
        ("constrained", Regime::Constrained(constraints), image(vec![blob(5.0, 6.0, 2.0, 1.0)])),
        (
            "joined",
            Regime::Joined,
            image(vec![blob(5.0, 6.0, 2.0, 1.0), blob(5.0, 6.0, 3.0, 0.9)]),
        ),
        ("simplex", Regime::Simplex, simplex_source()),
    ]
}

#[test]
fn test_zero_momentum_is_a_no_op() {
    let device = Default::default();
    let identity = identity_grid::<B, 4>(1, &[N, N], &device);

    for method in [
        IntegrationMethod::SemiLagrangian,
        IntegrationMethod::Sharp,
        IntegrationMethod::Hamiltonian,
    ] {
        for (name, regime, source) in regimes() {
            let config = IntegratorConfig::new().with_method(method).with_n_step(4).with_rho(0.5);
            let integrator = Integrator::new(config, kernel(), regime).unwrap();
            let mut trajectory = Trajectory::default();
            let shot = integrator
                .shoot(source.clone(), source.zeros_like(), Some(&mut trajectory))
                .unwrap();

            let image_error = max_abs_diff(shot.final_image, source.clone());
            assert!(image_error < 1e-5, "{method} / {name}: image moved by {image_error}");

            let deformation = trajectory.final_deformation().unwrap();
            let map_error = max_abs_diff(deformation, identity.clone());
            assert!(map_error < 1e-6, "{method} / {name}: map moved by {map_error}");

            assert_eq!(trajectory.n_step(), 4);
            assert!(trajectory.energies().iter().all(|e| e.abs() < 1e-12));
        }
    }
}

#[test]
fn test_zero_orienting_mask_reduces_to_metamorphosis() {
    let device = Default::default();
    let steps = 5;
    let source = image(vec![blob(5.0, 6.0, 2.0, 1.0)]);
    let momentum = image(vec![blob(6.0, 5.0, 2.5, 0.4)]);

    let constraints = Constraints::new(2.0, 0.7)
        .with_residual_mask(Tensor::ones([steps, 1, N, N], &device))
        .with_orienting(
            Tensor::zeros([steps, 1, N, N], &device),
            Tensor::ones([steps, 2, N, N], &device).mul_scalar(3.0),
        );
    let config = IntegratorConfig::new().with_n_step(steps).with_rho(0.6);
    let constrained = Integrator::new(config.clone(), kernel(), Regime::Constrained(constraints)).unwrap();
    let plain = Integrator::new(config, kernel(), Regime::Metamorphosis).unwrap();

    let mut constrained_trajectory = Trajectory::default();
    let mut plain_trajectory = Trajectory::default();
    constrained
        .shoot(source.clone(), momentum.clone(), Some(&mut constrained_trajectory))
        .unwrap();
    plain.shoot(source, momentum, Some(&mut plain_trajectory)).unwrap();

    for (a, b) in constrained_trajectory.images().iter().zip(plain_trajectory.images()) {
        assert!(max_abs_diff(a.clone(), b.clone()) < 1e-6);
    }
    let map_error = max_abs_diff(
        constrained_trajectory.final_deformation().unwrap(),
        plain_trajectory.final_deformation().unwrap(),
    );
    assert!(map_error < 1e-6);
}

#[test]
fn test_constrained_factory_with_zero_orienting_mask_matches_metamorphosis() {
    let device = Default::default();
    let steps = 4;
    let source = image(vec![blob(5.0, 6.0, 2.0, 1.0)]);
    let target = image(vec![blob(6.0, 6.0, 2.0, 1.0)]);

    let constrained = constrained_metamorphosis(
        source.clone(),
        target.clone(),
        0.0,
        Tensor::ones([steps, 1, N, N], &device),
        Tensor::zeros([steps, 2, N, N], &device),
        Tensor::zeros([steps, 1, N, N], &device),
        kernel(),
        &ConstrainedMetamorphosisConfig::new(0.01, 3, 1.0).with_rho(0.5),
    )
    .unwrap();
    let plain = metamorphosis(
        source,
        target,
        0.0,
        kernel(),
        &MetamorphosisConfig::new(0.5, 0.01, steps, 3, 1.0).with_safe_mode(false),
        None,
    )
    .unwrap();

    let a = constrained.report().unwrap();
    let b = plain.report().unwrap();
    assert_eq!(a.cost_history.len(), b.cost_history.len());
    for (x, y) in a.cost_history.iter().zip(&b.cost_history) {
        assert!((x - y).abs() <= 1e-4 * y.abs().max(1.0), "{x} vs {y}");
    }
}

#[test]
fn test_lddmm_matches_metamorphosis_with_rho_one() {
    let source = image(vec![blob(5.0, 6.0, 2.0, 1.0)]);
    let target = image(vec![blob(6.0, 6.5, 2.0, 1.0)]);

    let from_lddmm = lddmm(
        source.clone(),
        target.clone(),
        0.0,
        kernel(),
        &LddmmConfig::new(0.01, 5, 3, 1.0),
        None,
    )
    .unwrap();
    let from_metamorphosis = metamorphosis(
        source,
        target,
        0.0,
        kernel(),
        &MetamorphosisConfig::new(1.0, 0.01, 5, 3, 1.0).with_safe_mode(false),
        None,
    )
    .unwrap();

    assert_eq!(
        from_lddmm.report().unwrap().cost_history,
        from_metamorphosis.report().unwrap().cost_history
    );
    let a = from_lddmm.trajectory();
    let b = from_metamorphosis.trajectory();
    assert_eq!(a.n_step(), b.n_step());
    for (x, y) in a.images().iter().zip(b.images()) {
        assert_eq!(max_abs_diff(x.clone(), y.clone()), 0.0);
    }
}

#[test]
fn test_initial_tensor_must_match_source() {
    let source = image(vec![blob(5.0, 6.0, 2.0, 1.0)]);
    let wrong: Tensor<B, 4> = Tensor::zeros([1, 2, N, N], &Default::default());
    let err = InitialValue::from(wrong).resolve(&source).unwrap_err();
    assert!(matches!(err, ShootingError::ShapeMismatch { .. }));

    let err = InitialValue::<B, 4>::Scalar(f64::NAN).resolve(&source).unwrap_err();
    assert!(matches!(err, ShootingError::InvalidInput(_)));

    let poisoned = source.zeros_like().add_scalar(f32::NAN);
    let err = InitialValue::from(poisoned).resolve(&source).unwrap_err();
    assert!(matches!(err, ShootingError::InvalidInput(_)));
}

#[test]
fn test_non_finite_momentum_fails_without_panicking() {
    let source = image(vec![blob(5.0, 6.0, 2.0, 1.0)]);
    let target = image(vec![blob(6.0, 6.0, 2.0, 1.0)]);
    let config = MetamorphosisConfig::new(0.5, 0.01, 4, 3, 1.0).with_safe_mode(true);

    let momentum = source.zeros_like().add_scalar(f32::NAN);
    let result = metamorphosis(source.clone(), target.clone(), momentum, kernel(), &config, None);
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));

    // Bypassing the factory, the controller still refuses the momentum.
    let integrator = Integrator::new(
        IntegratorConfig::new().with_n_step(4).with_rho(0.5),
        kernel(),
        Regime::Metamorphosis,
    )
    .unwrap();
    let mut controller = ShootingController::new(source.clone(), target, integrator, ShootingConfig::new(0.01), None).unwrap();
    let err = controller
        .optimize_safe(source.zeros_like().add_scalar(f32::INFINITY), 3, 1.0)
        .unwrap_err();
    assert!(err.is_numerical_instability());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_scalar_momentum_equals_filled_tensor(value in -0.5f64..0.5) {
        let source = image(vec![blob(5.0, 6.0, 2.0, 1.0)]);
        let target = image(vec![blob(6.0, 6.0, 2.0, 1.0)]);

        let from_scalar = InitialValue::<B, 4>::from(value).resolve(&source).unwrap();
        let filled = Tensor::<B, 4>::full([1, 1, N, N], value, &Default::default());
        let from_tensor = InitialValue::from(filled).resolve(&source).unwrap();
        prop_assert_eq!(max_abs_diff(from_scalar.clone(), from_tensor.clone()), 0.0);

        let integrator = Integrator::new(
            IntegratorConfig::new().with_n_step(3).with_rho(0.5),
            kernel(),
            Regime::Metamorphosis,
        ).unwrap();
        let controller = ShootingController::new(
            source,
            target,
            integrator,
            ShootingConfig::new(0.01),
            None,
        ).unwrap();
        let a = controller.cost_of(from_scalar).unwrap();
        let b = controller.cost_of(from_tensor).unwrap();
        prop_assert_eq!(a, b);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_simplex_normalisation_sums_to_one(values in prop::collection::vec(0.01f32..4.0, 3 * 4)) {
        let state = Tensor::<B, 4>::from_data(TensorData::new(values, [1, 3, 2, 2]), &Default::default());
        let image = Regime::<B, 4>::Simplex.decode(Regime::<B, 4>::Simplex.normalize(state));

        let total = image.clone().sum_dim(1);
        let error: f32 = total.sub_scalar(1.0).abs().max().into_scalar();
        prop_assert!(error < 1e-5, "off by {}", error);
        let min: f32 = image.min().into_scalar();
        prop_assert!(min >= 0.0);
    }
}
