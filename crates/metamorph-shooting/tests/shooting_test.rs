use std::sync::Arc;

use burn::backend::Autodiff;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use metamorph_core::{DxConvention, GaussianKernel, KernelOperator, MultiScaleGaussianKernel};
use metamorph_shooting::{
    constrained_metamorphosis, joined_metamorphosis, lddmm, metamorphosis, oriented_metamorphosis,
    simplex_metamorphosis, weighted_metamorphosis, ConstrainedMetamorphosisConfig, IntegrationMethod,
    JoinedMetamorphosisConfig, LddmmConfig, MetamorphosisConfig, Ncc, OrientedMetamorphosisConfig,
    ShootingError, SimplexMetamorphosisConfig, WeightedMetamorphosisConfig,
};

type B = Autodiff<NdArray<f32>>;

fn blob(n: usize, cx: f32, cy: f32, sigma: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            data.push((-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
        }
    }
    data
}

fn tensor(n: usize, channels: Vec<Vec<f32>>) -> Tensor<B, 4> {
    let c = channels.len();
    let data: Vec<f32> = channels.into_iter().flatten().collect();
    Tensor::from_data(TensorData::new(data, [1, c, n, n]), &Default::default())
}

fn gaussian(sigma: f64) -> Arc<dyn KernelOperator<B, 4>> {
    Arc::new(GaussianKernel::isotropic(sigma).unwrap())
}

fn assert_monotone(history: &[f64], initial: f64) {
    let mut previous = initial;
    for &cost in history {
        assert!(cost <= previous, "cost went up: {cost} > {previous}");
        previous = cost;
    }
}

#[test]
fn test_lddmm_blob_shift_32() {
    let n = 32;
    let source = tensor(n, vec![blob(n, 14.0, 16.0, 4.0)]);
    let target = tensor(n, vec![blob(n, 17.0, 16.0, 4.0)]);

    let config = LddmmConfig::new(0.01, 10, 50, 1.0).with_safe_mode(true);
    let controller = lddmm(source.clone(), target, 0.0, gaussian(3.0), &config, None).unwrap();

    let report = controller.report().unwrap();
    let identity_cost = controller.cost_of(source.zeros_like()).unwrap().total;
    assert!((identity_cost - report.initial_cost).abs() < 1e-9);
    assert!(report.best_cost < identity_cost, "{} >= {identity_cost}", report.best_cost);
    assert!(report.cost_history.len() <= 50);
    assert_eq!(report.iterations, report.cost_history.len());
    assert_monotone(&report.cost_history, report.initial_cost);

    let trajectory = controller.trajectory();
    assert_eq!(trajectory.n_step(), 10);
    assert_eq!(trajectory.images().len(), 11);
    assert_eq!(trajectory.image_stack().unwrap().dims(), [10, 1, n, n]);
    assert_eq!(trajectory.velocity_stack().unwrap().dims(), [10, 2, n, n]);
    assert_eq!(trajectory.final_deformation().unwrap().dims(), [1, 2, n, n]);
    assert_eq!(controller.cost_history().len(), report.cost_history.len());
}

#[test]
fn test_metamorphosis_schemes_reduce_cost() {
    let n = 16;
    let source = tensor(n, vec![blob(n, 7.0, 8.0, 2.5)]);
    let target: Tensor<B, 4> = tensor(n, vec![blob(n, 8.5, 8.0, 2.5)]).mul_scalar(0.8);

    for method in [
        IntegrationMethod::SemiLagrangian,
        IntegrationMethod::Sharp,
        IntegrationMethod::Hamiltonian,
    ] {
        let config = MetamorphosisConfig::new(0.5, 0.01, 5, 8, 1.0).with_integration_method(method);
        let controller = metamorphosis(source.clone(), target.clone(), 0.0, gaussian(2.0), &config, None).unwrap();
        let report = controller.report().unwrap();
        assert!(report.best_cost < report.initial_cost, "{method}");
        assert_monotone(&report.cost_history, report.initial_cost);
    }
}

#[test]
fn test_hamiltonian_cost_and_normalised_convention() {
    let n = 16;
    let source = tensor(n, vec![blob(n, 7.0, 8.0, 2.5)]);
    let target = tensor(n, vec![blob(n, 8.0, 8.0, 2.5)]);
    let kernel: Arc<dyn KernelOperator<B, 4>> = Arc::new(MultiScaleGaussianKernel::new(&[1.0, 3.0]).unwrap());

    let config = MetamorphosisConfig::new(0.7, 0.05, 4, 5, 1.0)
        .with_hamiltonian_integration(true)
        .with_dx_convention(DxConvention::TwoSquare);
    let controller = metamorphosis(source, target, 0.0, kernel, &config, Some(Box::new(Ncc::new()))).unwrap();
    let report = controller.report().unwrap();
    assert!(report.best_cost <= report.initial_cost);
    assert_eq!(controller.trajectory().dx_convention(), DxConvention::TwoSquare);
    assert!(controller.trajectory().final_deformation_physical().is_some());
}

#[test]
fn test_weighted_and_oriented_metamorphosis() {
    let n = 16;
    let device = Default::default();
    let source = tensor(n, vec![blob(n, 7.0, 8.0, 2.5)]);
    let target = tensor(n, vec![blob(n, 8.5, 8.0, 2.5)]);

    let mask = Tensor::<B, 4>::ones([6, 1, n, n], &device);
    let weighted = weighted_metamorphosis(
        source.clone(),
        target.clone(),
        0,
        mask,
        gaussian(2.0),
        &WeightedMetamorphosisConfig::new(0.01, 6, 1.0),
        None,
    )
    .unwrap();
    assert_eq!(weighted.integrator().n_step(), 6);
    let report = weighted.report().unwrap();
    assert!(report.best_cost <= report.initial_cost);

    let orienting = lddmm(
        source.clone(),
        target.clone(),
        0.0,
        gaussian(2.0),
        &LddmmConfig::new(0.01, 4, 3, 1.0),
        None,
    )
    .unwrap();
    let oriented = oriented_metamorphosis(
        source,
        target,
        0.0,
        orienting.trajectory(),
        &OrientedMetamorphosisConfig::new(0.1, 0.5, 1.0, 2.0, 0.01, 4, 1.0),
    )
    .unwrap();
    assert_eq!(oriented.integrator().n_step(), 4);
    assert_eq!(oriented.trajectory().n_step(), 4);
}

#[test]
fn test_joined_metamorphosis_keeps_mask_in_range() {
    let n = 16;
    let image = |cx: f32| tensor(n, vec![blob(n, cx, 8.0, 2.5)]);
    let mask = |cx: f32| {
        let values = blob(n, cx, 8.0, 2.5)
            .into_iter()
            .map(|v| if v > 0.3 { 1.0 } else { 0.0 })
            .collect();
        tensor(n, vec![values])
    };

    let config = JoinedMetamorphosisConfig::new(0.5)
        .with_n_step(4)
        .with_n_iter(5)
        .with_grad_coef(1.0)
        .with_safe_mode(true);
    let controller =
        joined_metamorphosis(image(7.0), image(8.5), mask(7.0), mask(8.5), 0.0, gaussian(2.0), &config, None)
            .unwrap();

    let report = controller.report().unwrap();
    assert!(report.best_cost <= report.initial_cost);
    let final_image = controller.trajectory().final_image().unwrap();
    assert_eq!(final_image.dims(), [1, 2, n, n]);
    let final_mask = final_image.narrow(1, 1, 1);
    let min: f32 = final_mask.clone().min().into_scalar();
    let max: f32 = final_mask.max().into_scalar();
    assert!(min >= 0.0 && max <= 1.0);
}

#[test]
fn test_simplex_metamorphosis_stays_on_simplex() {
    let n = 16;
    let simplex = |cx: f32| {
        let a: Vec<f32> = blob(n, cx, 8.0, 2.5).into_iter().map(|v| 0.7 * v).collect();
        let b: Vec<f32> = blob(n, 8.0, cx, 3.0).into_iter().map(|v| 0.2 * v).collect();
        let rest = a.iter().zip(&b).map(|(x, y)| 1.0 - x - y).collect();
        tensor(n, vec![a, b, rest])
    };

    let config = SimplexMetamorphosisConfig::new(0.5)
        .with_n_step(4)
        .with_n_iter(4)
        .with_grad_coef(1.0)
        .with_cost_cst(0.01)
        .with_safe_mode(true)
        .with_plot(true);
    let controller = simplex_metamorphosis(simplex(7.0), simplex(8.5), 0.0, gaussian(2.0), &config, None).unwrap();

    let report = controller.report().unwrap();
    assert!(report.best_cost <= report.initial_cost);
    assert!(report.cost_history.len() <= 4);
    for image in controller.trajectory().images() {
        let total = image.clone().sum_dim(1);
        let error: f32 = total.sub_scalar(1.0).abs().max().into_scalar();
        assert!(error < 1e-3, "channels sum off by {error}");
        let min: f32 = image.clone().min().into_scalar();
        assert!(min >= 0.0);
    }
}

#[test]
fn test_oriented_metamorphosis_requires_batch_one() {
    let n = 12;
    let single = tensor(n, vec![blob(n, 5.0, 6.0, 2.0)]);
    let target = tensor(n, vec![blob(n, 6.0, 6.0, 2.0)]);
    let pair = Tensor::cat(vec![single.clone(), single.clone()], 0);
    let pair_target = Tensor::cat(vec![target.clone(), target.clone()], 0);
    let config = OrientedMetamorphosisConfig::new(0.1, 0.5, 1.0, 2.0, 0.01, 2, 1.0);

    // Batched orienting trajectory: its stacks would hold 2 * T rows.
    let batched = lddmm(pair.clone(), pair_target.clone(), 0.0, gaussian(2.0), &LddmmConfig::new(0.01, 3, 1, 1.0), None)
        .unwrap();
    assert_eq!(batched.trajectory().image_stack().unwrap().dims()[0], 6);
    let result = oriented_metamorphosis(single.clone(), target.clone(), 0.0, batched.trajectory(), &config);
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));

    let orienting = lddmm(single, target, 0.0, gaussian(2.0), &LddmmConfig::new(0.01, 3, 1, 1.0), None).unwrap();
    let result = oriented_metamorphosis(pair, pair_target, 0.0, orienting.trajectory(), &config);
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));
}

#[test]
fn test_masks_outside_unit_range_are_rejected() {
    let n = 12;
    let device = Default::default();
    let source = tensor(n, vec![blob(n, 5.0, 6.0, 2.0)]);
    let target = tensor(n, vec![blob(n, 6.0, 6.0, 2.0)]);
    let steps = 3;

    let result = weighted_metamorphosis(
        source.clone(),
        target.clone(),
        0.0,
        Tensor::<B, 4>::ones([steps, 1, n, n], &device).mul_scalar(1.5),
        gaussian(2.0),
        &WeightedMetamorphosisConfig::new(0.01, 2, 1.0),
        None,
    );
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));

    let constrained = |mask_w: Tensor<B, 4>, mask_o: Tensor<B, 4>| {
        constrained_metamorphosis(
            source.clone(),
            target.clone(),
            0.0,
            mask_w,
            Tensor::zeros([steps, 2, n, n], &device),
            mask_o,
            gaussian(2.0),
            &ConstrainedMetamorphosisConfig::new(0.01, 2, 1.0),
        )
    };
    let ones = Tensor::<B, 4>::ones([steps, 1, n, n], &device);
    let result = constrained(ones.clone().neg(), ones.zeros_like());
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));
    let result = constrained(ones.clone(), ones.add_scalar(f32::NAN));
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));
}

#[test]
fn test_simplex_metamorphosis_rejects_off_simplex_images() {
    let n = 12;
    let a = blob(n, 5.0, 6.0, 2.0);
    let rest: Vec<f32> = a.iter().map(|v| 1.0 - v).collect();
    let on_simplex = tensor(n, vec![a.clone(), rest]);
    // Channels sum to 1 + a.
    let off_simplex = tensor(n, vec![a.clone(), vec![1.0; n * n]]);
    let config = SimplexMetamorphosisConfig::new(0.5).with_n_step(2).with_n_iter(1);

    let result = simplex_metamorphosis(off_simplex.clone(), on_simplex.clone(), 0.0, gaussian(2.0), &config, None);
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));
    let result = simplex_metamorphosis(on_simplex.clone(), off_simplex, 0.0, gaussian(2.0), &config, None);
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));

    let single_channel = tensor(n, vec![a]);
    let result = simplex_metamorphosis(single_channel.clone(), single_channel, 0.0, gaussian(2.0), &config, None);
    assert!(matches!(result, Err(ShootingError::InvalidInput(_))));
}
