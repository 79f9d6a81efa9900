//! Shooting Demo
//!
//! Registers a disc onto a shifted, dimmer disc twice: once with pure LDDMM and
//! once with metamorphosis, then compares what each explained.
//!
//! Usage:
//!   RUST_LOG=info cargo run --example shooting_demo

use std::sync::Arc;

use burn::backend::Autodiff;
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use metamorph_core::{GaussianKernel, KernelOperator};
use metamorph_shooting::{lddmm, metamorphosis, LddmmConfig, MetamorphosisConfig};
use tracing_subscriber::EnvFilter;

type Backend = Autodiff<NdArray<f32>>;

const SIZE: usize = 48;

fn disc(cx: f32, cy: f32, radius: f32, intensity: f32) -> Tensor<Backend, 4> {
    let mut data = Vec::with_capacity(SIZE * SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
            // Soft edge, two pixels wide.
            let value = ((radius - d) / 2.0 + 0.5).clamp(0.0, 1.0);
            data.push(intensity * value);
        }
    }
    Tensor::from_data(TensorData::new(data, [1, 1, SIZE, SIZE]), &Default::default())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let source = disc(20.0, 24.0, 9.0, 1.0);
    let target = disc(26.0, 24.0, 9.0, 0.7);
    let kernel: Arc<dyn KernelOperator<Backend, 4>> = Arc::new(GaussianKernel::isotropic(4.0)?);

    println!("Shooting Demo ({SIZE}x{SIZE})");
    println!("=======================\n");

    let config = LddmmConfig::new(0.01, 10, 40, 1.0).with_safe_mode(true);
    let registration = lddmm(source.clone(), target.clone(), 0.0, kernel.clone(), &config, None)?;
    if let Some(report) = registration.report() {
        println!(
            "LDDMM:          {} after {} iterations, cost {:.4} -> {:.4}",
            report.status, report.iterations, report.initial_cost, report.best_cost
        );
    }

    let config = MetamorphosisConfig::new(0.5, 0.01, 10, 40, 1.0);
    let registration = metamorphosis(source, target, 0.0, kernel, &config, None)?;
    if let Some(report) = registration.report() {
        println!(
            "Metamorphosis:  {} after {} iterations, cost {:.4} -> {:.4}",
            report.status, report.iterations, report.initial_cost, report.best_cost
        );
    }
    if let Some(last) = registration.cost_history().last() {
        println!(
            "  data {:.4}, regularisation {:.4}, {} backoffs",
            last.data,
            last.regularization,
            registration.report().map_or(0, |r| r.retries_used)
        );
    }

    let trajectory = registration.trajectory();
    println!("\nTrajectory energies:");
    for (step, energy) in trajectory.energies().iter().enumerate() {
        println!("  step {step:2}: {energy:.5}");
    }
    Ok(())
}
