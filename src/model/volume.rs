//! Voxel images: scalar volumes, binary label images and label-map volumes.

use crate::error::{PipelineError, StageResult};
use crate::geometry::{compute_bounds, Bounds, ImageGeometry};
use nalgebra::Point3;
use ndarray::{Array3, Zip};

/// Voxel buffer on an oriented grid.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientedImage<T> {
    pub geometry: ImageGeometry,
    pub voxels: Array3<T>,
}

/// Scalar anatomical volume.
pub type Volume = OrientedImage<f32>;

/// Binary (or small-integer) label buffer, e.g. a segment's label-map representation.
pub type LabelImage = OrientedImage<u8>;

impl<T: Clone + Default> OrientedImage<T> {
    /// Image filled with the default voxel value.
    pub fn new(geometry: ImageGeometry) -> Self {
        let voxels = Array3::from_elem(geometry.shape(), T::default());
        Self { geometry, voxels }
    }

    /// Pair a buffer with its grid, checking the shape agrees with the extent.
    pub fn from_parts(geometry: ImageGeometry, voxels: Array3<T>) -> StageResult<Self> {
        if voxels.dim() != geometry.shape() {
            return Err(PipelineError::geometry(format!(
                "buffer shape {:?} does not match grid extent {:?}",
                voxels.dim(),
                geometry.dims
            )));
        }
        Ok(Self { geometry, voxels })
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<&T> {
        self.voxels.get([k, j, i])
    }

    /// Value of the voxel nearest to a world point, `None` outside the grid.
    pub fn nearest(&self, world: &Point3<f64>, to_index: &nalgebra::Matrix4<f64>) -> Option<&T> {
        let idx = to_index.transform_point(world);
        let mut rounded = [0usize; 3];
        for axis in 0..3 {
            let r = idx[axis].round();
            if r < 0.0 || r >= self.geometry.dims[axis] as f64 {
                return None;
            }
            rounded[axis] = r as usize;
        }
        self.get(rounded[0], rounded[1], rounded[2])
    }
}

impl<T: Copy + Default + Send + Sync> OrientedImage<T> {
    /// Nearest-neighbour resampling onto `reference`.
    ///
    /// `from_reference` maps a world point of the output grid to the world
    /// point to sample in this image (identity for plain regridding).
    /// Output voxels falling outside this image get the default value.
    pub fn resample_nearest<F>(&self, reference: &ImageGeometry, from_reference: F) -> StageResult<Self>
    where
        F: Fn(&Point3<f64>) -> Point3<f64> + Sync,
    {
        reference.validate()?;
        let to_index = self
            .geometry
            .world_to_image()
            .ok_or_else(|| PipelineError::geometry("source grid is not invertible"))?;
        let mut out = Array3::from_elem(reference.shape(), T::default());
        Zip::indexed(&mut out).par_for_each(|(k, j, i), value| {
            let world = from_reference(&reference.index_to_world(i, j, k));
            if let Some(v) = self.nearest(&world, &to_index) {
                *value = *v;
            }
        });
        Ok(Self {
            geometry: reference.clone(),
            voxels: out,
        })
    }
}

impl OrientedImage<f32> {
    /// Trilinear sample at a world point; `None` outside the grid.
    pub fn sample_linear(&self, world: &Point3<f64>, to_index: &nalgebra::Matrix4<f64>) -> Option<f32> {
        let idx = to_index.transform_point(world);
        let dims = self.geometry.dims;
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let c = idx[axis];
            if c < -0.5 || c > dims[axis] as f64 - 0.5 {
                return None;
            }
            let clamped = c.clamp(0.0, (dims[axis] - 1) as f64);
            base[axis] = clamped.floor() as usize;
            frac[axis] = clamped - clamped.floor();
        }
        let mut acc = 0.0f64;
        for corner in 0..8 {
            let mut weight = 1.0;
            let mut at = [0usize; 3];
            for axis in 0..3 {
                let upper = corner & (1 << axis) != 0;
                at[axis] = (base[axis] + upper as usize).min(dims[axis] - 1);
                weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
            }
            if weight > 0.0 {
                acc += self.voxels[[at[2], at[1], at[0]]] as f64 * weight;
            }
        }
        Some(acc as f32)
    }

    /// Trilinear resampling onto `reference`, see [`Self::resample_nearest`].
    pub fn resample_linear<F>(&self, reference: &ImageGeometry, from_reference: F) -> StageResult<Self>
    where
        F: Fn(&Point3<f64>) -> Point3<f64> + Sync,
    {
        reference.validate()?;
        let to_index = self
            .geometry
            .world_to_image()
            .ok_or_else(|| PipelineError::geometry("source grid is not invertible"))?;
        let mut out = Array3::<f32>::zeros(reference.shape());
        Zip::indexed(&mut out).par_for_each(|(k, j, i), value| {
            let world = from_reference(&reference.index_to_world(i, j, k));
            *value = self.sample_linear(&world, &to_index).unwrap_or(0.0);
        });
        Ok(Self {
            geometry: reference.clone(),
            voxels: out,
        })
    }
}

impl OrientedImage<u8> {
    /// World bounds of the non-zero voxels.
    pub fn bounds(&self) -> Option<Bounds> {
        compute_bounds(&self.geometry, &self.voxels)
    }

    pub fn count_nonzero(&self) -> usize {
        self.voxels.iter().filter(|v| **v != 0).count()
    }
}

/// Display settings attached to an exported label map.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDisplay {
    pub visible: bool,
    pub color_table: String,
}

impl Default for LabelDisplay {
    fn default() -> Self {
        Self {
            visible: true,
            color_table: "GenericAnatomyColors".to_string(),
        }
    }
}

/// Standalone label-map volume handed to the registration engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMapVolume {
    pub image: LabelImage,
    pub display: LabelDisplay,
}

impl LabelMapVolume {
    /// Export an oriented image buffer with default display settings.
    pub fn from_image(image: LabelImage) -> Self {
        Self {
            image,
            display: LabelDisplay::default(),
        }
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.image.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_rejects_shape_mismatch() {
        let g = ImageGeometry::axis_aligned([4, 3, 2], [0.0; 3], [1.0; 3]);
        assert!(LabelImage::from_parts(g.clone(), Array3::zeros((2, 3, 4))).is_ok());
        assert!(LabelImage::from_parts(g, Array3::zeros((4, 3, 2))).is_err());
    }

    #[test]
    fn test_nearest_resample_onto_shifted_grid() {
        let g = ImageGeometry::axis_aligned([4, 4, 4], [0.0; 3], [1.0; 3]);
        let mut img = LabelImage::new(g);
        img.voxels[[1, 1, 1]] = 1;
        let reference = ImageGeometry::axis_aligned([3, 3, 3], [1.0; 3], [1.0; 3]);
        let out = img.resample_nearest(&reference, |p| *p).unwrap();
        assert_eq!(out.voxels[[0, 0, 0]], 1);
        assert_eq!(out.count_nonzero(), 1);
        assert!(out.geometry.matches_exactly(&reference));
    }

    #[test]
    fn test_linear_sample_midpoint() {
        let g = ImageGeometry::axis_aligned([2, 1, 1], [0.0; 3], [1.0; 3]);
        let mut v = Volume::new(g.clone());
        v.voxels[[0, 0, 1]] = 10.0;
        let to_index = g.world_to_image().unwrap();
        let s = v.sample_linear(&Point3::new(0.5, 0.0, 0.0), &to_index).unwrap();
        assert!((s - 5.0).abs() < 1e-5);
    }
}
