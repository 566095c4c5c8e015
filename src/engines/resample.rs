//! Scalar volume resampling onto a new spacing.

use crate::error::EngineError;
use crate::model::Volume;
use nalgebra::Vector3;
use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Linear,
    Lanczos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResampleParameters {
    /// Output voxel spacing.
    pub spacing: Vector3<f64>,
    pub interpolation: Interpolation,
}

impl Default for ResampleParameters {
    fn default() -> Self {
        Self {
            spacing: Vector3::new(1.0, 1.0, 1.0),
            interpolation: Interpolation::Lanczos,
        }
    }
}

/// Resamples a volume; blocks until the output is complete.
pub trait ResamplingEngine {
    fn name(&self) -> &str;

    fn resample(&self, input: &Volume, params: &ResampleParameters) -> Result<Volume, EngineError>;
}

/// Windowed-sinc resampler with a separable kernel.
#[derive(Debug, Clone)]
pub struct LanczosResampler {
    radius: usize,
}

impl Default for LanczosResampler {
    fn default() -> Self {
        Self { radius: 3 }
    }
}

impl LanczosResampler {
    pub fn new(radius: usize) -> Self {
        Self {
            radius: radius.max(1),
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    fn kernel(&self, x: f64) -> f64 {
        let a = self.radius as f64;
        if x.abs() < 1e-12 {
            return 1.0;
        }
        if x.abs() >= a {
            return 0.0;
        }
        let px = PI * x;
        a * px.sin() * (px / a).sin() / (px * px)
    }

    /// Taps and normalized weights along one axis, clamped to the edge.
    fn taps(&self, c: f64, len: usize) -> Vec<(usize, f64)> {
        let base = c.floor() as i64;
        let r = self.radius as i64;
        let mut taps: Vec<(usize, f64)> = (base - r + 1..=base + r)
            .map(|n| {
                let w = self.kernel(c - n as f64);
                (n.clamp(0, len as i64 - 1) as usize, w)
            })
            .collect();
        let total: f64 = taps.iter().map(|(_, w)| w).sum();
        if total.abs() > f64::EPSILON {
            for tap in &mut taps {
                tap.1 /= total;
            }
        }
        taps
    }

    fn sample(&self, input: &Array3<f32>, dims: [usize; 3], index: [f64; 3]) -> Option<f32> {
        for axis in 0..3 {
            if index[axis] < -0.5 || index[axis] > dims[axis] as f64 - 0.5 {
                return None;
            }
        }
        let tx = self.taps(index[0], dims[0]);
        let ty = self.taps(index[1], dims[1]);
        let tz = self.taps(index[2], dims[2]);
        let mut acc = 0.0;
        for (k, wz) in &tz {
            for (j, wy) in &ty {
                let wzy = wz * wy;
                for (i, wx) in &tx {
                    acc += input[[*k, *j, *i]] as f64 * wzy * wx;
                }
            }
        }
        Some(acc as f32)
    }
}

impl ResamplingEngine for LanczosResampler {
    fn name(&self) -> &str {
        "lanczos_resampler"
    }

    fn resample(&self, input: &Volume, params: &ResampleParameters) -> Result<Volume, EngineError> {
        if params.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(EngineError::invalid_input(
                self.name(),
                format!("invalid output spacing {:?}", params.spacing.as_slice()),
            ));
        }
        input
            .geometry
            .validate()
            .map_err(|e| EngineError::invalid_input(self.name(), e.to_string()))?;

        let output = input.geometry.resampled(&params.spacing);
        debug!(
            engine = self.name(),
            interpolation = ?params.interpolation,
            input_dims = ?input.geometry.dims,
            output_dims = ?output.dims,
            "Resampling volume"
        );

        match params.interpolation {
            Interpolation::Linear => input
                .resample_linear(&output, |p| *p)
                .map_err(|e| EngineError::execution(self.name(), e.to_string())),
            Interpolation::Lanczos => {
                let to_index = input
                    .geometry
                    .world_to_image()
                    .ok_or_else(|| EngineError::invalid_input(self.name(), "input grid is not invertible"))?;
                let dims = input.geometry.dims;
                let mut voxels = Array3::<f32>::zeros(output.shape());
                Zip::indexed(&mut voxels).par_for_each(|(k, j, i), value| {
                    let idx = to_index.transform_point(&output.index_to_world(i, j, k));
                    *value = self
                        .sample(&input.voxels, dims, [idx.x, idx.y, idx.z])
                        .unwrap_or(0.0);
                });
                Ok(Volume {
                    geometry: output,
                    voxels,
                })
            }
        }
    }
}
