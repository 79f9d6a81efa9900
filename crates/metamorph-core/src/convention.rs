//! Coordinate conventions for the spatial grid.
//!
//! Shooting always happens on the pixel lattice. The convention only decides
//! the grid spacing used by the finite differences (and therefore the scale of
//! gradients, divergences and velocities) and how deformations are reported.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How pixel indices map to physical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DxConvention {
    /// Unit spacing, coordinates are pixel indices.
    #[default]
    Pixel,
    /// Isotropic spacing such that the longest axis spans `[-1, 1]`.
    TwoSquare,
    /// Every axis spans `[-1, 1]` independently.
    MinusOneToOne,
}

impl DxConvention {
    /// Name accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pixel => "pixel",
            Self::TwoSquare => "2square",
            Self::MinusOneToOne => "-1to1",
        }
    }

    /// Grid spacing along each spatial axis of a grid with the given extent.
    pub fn spacing(&self, spatial_shape: &[usize]) -> Vec<f64> {
        match self {
            Self::Pixel => vec![1.0; spatial_shape.len()],
            Self::MinusOneToOne => spatial_shape.iter().map(|&n| unit_span_step(n)).collect(),
            Self::TwoSquare => {
                let longest = spatial_shape.iter().copied().max().unwrap_or(1);
                vec![unit_span_step(longest); spatial_shape.len()]
            }
        }
    }

    /// Convert a field of pixel positions `[B, d, S..]` into coordinates of this convention.
    ///
    /// Normalised conventions are centred: pixel index `k` on an axis of length `n`
    /// maps to `(k - (n - 1) / 2) * h`.
    pub fn pixel_to_physical<B: Backend, const D: usize>(&self, positions: Tensor<B, D>) -> Tensor<B, D> {
        if *self == Self::Pixel {
            return positions;
        }
        let dims = positions.dims();
        let spatial = &dims[2..];
        let spacing = self.spacing(spatial);

        let components = (0..spatial.len())
            .map(|axis| {
                let centre = (spatial[axis] as f64 - 1.0) / 2.0;
                positions
                    .clone()
                    .narrow(1, axis, 1)
                    .sub_scalar(centre)
                    .mul_scalar(spacing[axis])
            })
            .collect();
        Tensor::cat(components, 1)
    }
}

fn unit_span_step(n: usize) -> f64 {
    if n > 1 {
        2.0 / (n as f64 - 1.0)
    } else {
        1.0
    }
}

impl FromStr for DxConvention {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pixel" => Ok(Self::Pixel),
            "2square" => Ok(Self::TwoSquare),
            "-1to1" => Ok(Self::MinusOneToOne),
            other => Err(CoreError::UnknownConvention(other.to_string())),
        }
    }
}

impl fmt::Display for DxConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
