use crate::error::EngineError;
use crate::geometry::ImageGeometry;
use crate::model::{Roi, Volume};
use nalgebra::Vector3;
use ndarray::s;
use tracing::debug;

/// Crops a volume to a region of interest.
pub trait CropEngine {
    fn name(&self) -> &str;

    /// Produce a new volume restricted to `roi`.
    ///
    /// With `voxel_based` the output reuses the input grid (a voxel sub-range);
    /// otherwise the ROI box is resampled onto an axis-aligned grid.
    fn crop(&self, input: &Volume, roi: &Roi, voxel_based: bool) -> Result<Volume, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct VoxelCropEngine;

impl VoxelCropEngine {
    pub fn new() -> Self {
        Self
    }

    fn crop_voxels(&self, input: &Volume, roi: &Roi) -> Result<Volume, EngineError> {
        let to_index = input
            .geometry
            .world_to_image()
            .ok_or_else(|| EngineError::invalid_input(self.name(), "input grid is not invertible"))?;

        let bounds = roi.bounds();
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for corner in bounds.corners() {
            let idx = to_index.transform_point(&corner);
            for axis in 0..3 {
                lo[axis] = lo[axis].min(idx[axis]);
                hi[axis] = hi[axis].max(idx[axis]);
            }
        }

        // Keep voxels whose centers fall inside the ROI.
        let dims = input.geometry.dims;
        let mut first = [0usize; 3];
        let mut end = [0usize; 3];
        for axis in 0..3 {
            let start = lo[axis].ceil().max(0.0);
            let stop = (hi[axis].floor() + 1.0).min(dims[axis] as f64);
            if stop <= start {
                return Err(EngineError::invalid_input(
                    self.name(),
                    format!("ROI {} does not intersect the input volume", bounds),
                ));
            }
            first[axis] = start as usize;
            end[axis] = stop as usize;
        }

        let voxels = input
            .voxels
            .slice(s![first[2]..end[2], first[1]..end[1], first[0]..end[0]])
            .to_owned();
        let geometry = input.geometry.sub_grid(first, end);
        debug!(engine = self.name(), from = ?dims, to = ?geometry.dims, "Voxel crop");
        Ok(Volume { geometry, voxels })
    }

    fn crop_resampled(&self, input: &Volume, roi: &Roi) -> Result<Volume, EngineError> {
        let spacing = input.geometry.spacing.min();
        let bounds = roi.bounds();
        let extent = bounds.extent();
        let dims = [
            ((extent.x / spacing).ceil() as usize).max(1),
            ((extent.y / spacing).ceil() as usize).max(1),
            ((extent.z / spacing).ceil() as usize).max(1),
        ];
        let half = Vector3::repeat(spacing / 2.0);
        let origin = bounds.min + half;
        let reference = ImageGeometry::axis_aligned(dims, [origin.x, origin.y, origin.z], [spacing; 3]);
        input
            .resample_linear(&reference, |p| *p)
            .map_err(|e| EngineError::execution(self.name(), e.to_string()))
    }
}

impl CropEngine for VoxelCropEngine {
    fn name(&self) -> &str {
        "voxel_crop"
    }

    fn crop(&self, input: &Volume, roi: &Roi, voxel_based: bool) -> Result<Volume, EngineError> {
        if roi.radius.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(EngineError::invalid_input(self.name(), "ROI radius must be positive"));
        }
        if voxel_based {
            self.crop_voxels(input, roi)
        } else {
            self.crop_resampled(input, roi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn ramp() -> Volume {
        let geometry = ImageGeometry::axis_aligned([20, 20, 20], [0.0; 3], [1.0; 3]);
        let mut v = Volume::new(geometry);
        for ((k, j, i), value) in v.voxels.indexed_iter_mut() {
            *value = (i + 100 * j + 10000 * k) as f32;
        }
        v
    }

    #[test]
    fn test_voxel_crop_keeps_grid() {
        let roi = Roi::new(Point3::new(10.0, 10.0, 10.0), Vector3::new(2.0, 3.0, 1.0));
        let out = VoxelCropEngine::new().crop(&ramp(), &roi, true).unwrap();
        assert_eq!(out.geometry.dims, [5, 7, 3]);
        assert_eq!(out.geometry.origin, Point3::new(8.0, 7.0, 9.0));
        assert_eq!(out.voxels[[0, 0, 0]], (8 + 700 + 90000) as f32);
    }

    #[test]
    fn test_crop_clamps_to_volume() {
        let roi = Roi::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(5.0, 5.0, 5.0));
        let out = VoxelCropEngine::new().crop(&ramp(), &roi, true).unwrap();
        assert_eq!(out.geometry.dims, [6, 6, 6]);
    }

    #[test]
    fn test_disjoint_roi_is_rejected() {
        let roi = Roi::new(Point3::new(100.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let err = VoxelCropEngine::new().crop(&ramp(), &roi, true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_resampled_crop_covers_roi() {
        let roi = Roi::new(Point3::new(10.0, 10.0, 10.0), Vector3::new(2.0, 2.0, 2.0));
        let out = VoxelCropEngine::new().crop(&ramp(), &roi, false).unwrap();
        assert_eq!(out.geometry.dims, [4, 4, 4]);
        assert_eq!(out.geometry.origin, Point3::new(8.5, 8.5, 8.5));
    }
}
