use crate::error::{PipelineError, StageResult};
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// Tolerance used when comparing grid origins, spacings and directions.
pub const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// Voxel grid of a 3D image: extent, origin, spacing and axis directions.
///
/// Buffers laid out on this grid are `ndarray` arrays of shape `(k, j, i)`,
/// i.e. `[dims[2], dims[1], dims[0]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    /// Number of voxels along i, j, k.
    pub dims: [usize; 3],
    /// World position of voxel (0, 0, 0).
    pub origin: Point3<f64>,
    pub spacing: Vector3<f64>,
    /// Columns are the world directions of the i, j, k axes.
    pub directions: Matrix3<f64>,
}

impl ImageGeometry {
    pub fn new(
        dims: [usize; 3],
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        directions: Matrix3<f64>,
    ) -> Self {
        Self {
            dims,
            origin,
            spacing,
            directions,
        }
    }

    /// Grid with identity directions.
    pub fn axis_aligned(dims: [usize; 3], origin: [f64; 3], spacing: [f64; 3]) -> Self {
        Self::new(
            dims,
            Point3::from(origin),
            Vector3::from(spacing),
            Matrix3::identity(),
        )
    }

    /// `(k, j, i)` array shape for buffers on this grid.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.dims[2], self.dims[1], self.dims[0])
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Homogeneous image (continuous index) to world matrix.
    pub fn image_to_world(&self) -> Matrix4<f64> {
        let linear = self.directions * Matrix3::from_diagonal(&self.spacing);
        let mut m = linear.to_homogeneous();
        m[(0, 3)] = self.origin.x;
        m[(1, 3)] = self.origin.y;
        m[(2, 3)] = self.origin.z;
        m
    }

    /// Inverse of [`Self::image_to_world`]; `None` for a singular grid.
    pub fn world_to_image(&self) -> Option<Matrix4<f64>> {
        self.image_to_world().try_inverse()
    }

    pub fn continuous_index_to_world(&self, index: &Point3<f64>) -> Point3<f64> {
        self.image_to_world().transform_point(index)
    }

    pub fn index_to_world(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.continuous_index_to_world(&Point3::new(i as f64, j as f64, k as f64))
    }

    pub fn world_to_continuous_index(&self, point: &Point3<f64>) -> Option<Point3<f64>> {
        self.world_to_image().map(|m| m.transform_point(point))
    }

    /// Origin, spacing and directions agree within [`GEOMETRY_TOLERANCE`].
    pub fn matches(&self, other: &ImageGeometry) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= GEOMETRY_TOLERANCE;
        self.origin
            .iter()
            .zip(other.origin.iter())
            .all(|(a, b)| close(*a, *b))
            && self
                .spacing
                .iter()
                .zip(other.spacing.iter())
                .all(|(a, b)| close(*a, *b))
            && self
                .directions
                .iter()
                .zip(other.directions.iter())
                .all(|(a, b)| close(*a, *b))
    }

    pub fn extent_matches(&self, other: &ImageGeometry) -> bool {
        self.dims == other.dims
    }

    /// Same grid and same extent: buffers are voxel-for-voxel co-registered.
    pub fn matches_exactly(&self, other: &ImageGeometry) -> bool {
        self.matches(other) && self.extent_matches(other)
    }

    /// Grid after applying a linear world transform (to-parent direction).
    ///
    /// Returns `None` when the transform collapses an axis.
    pub fn transformed(&self, to_parent: &Matrix4<f64>) -> Option<ImageGeometry> {
        let m = to_parent * self.image_to_world();
        let linear = m.fixed_view::<3, 3>(0, 0).into_owned();
        let mut spacing = Vector3::zeros();
        let mut directions = Matrix3::zeros();
        for axis in 0..3 {
            let column = linear.column(axis);
            let norm = column.norm();
            if !norm.is_finite() || norm <= f64::EPSILON {
                return None;
            }
            spacing[axis] = norm;
            directions.set_column(axis, &(column / norm));
        }
        Some(ImageGeometry {
            dims: self.dims,
            origin: Point3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]),
            spacing,
            directions,
        })
    }

    /// Grid covering the same physical region with a new spacing.
    ///
    /// The first voxel keeps its corner position; the voxel count along each
    /// axis is the rounded ratio of physical size to the new spacing.
    pub fn resampled(&self, new_spacing: &Vector3<f64>) -> ImageGeometry {
        let mut dims = [1usize; 3];
        let mut origin_index = Point3::origin();
        for axis in 0..3 {
            let physical = self.dims[axis] as f64 * self.spacing[axis];
            dims[axis] = ((physical / new_spacing[axis]).round() as usize).max(1);
            // Keep the outer corner of voxel 0 fixed.
            origin_index[axis] = -0.5 + 0.5 * new_spacing[axis] / self.spacing[axis];
        }
        ImageGeometry {
            dims,
            origin: self.continuous_index_to_world(&origin_index),
            spacing: *new_spacing,
            directions: self.directions,
        }
    }

    /// Grid of the voxel sub-range `lo..hi` (exclusive).
    pub fn sub_grid(&self, lo: [usize; 3], hi: [usize; 3]) -> ImageGeometry {
        ImageGeometry {
            dims: [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]],
            origin: self.index_to_world(lo[0], lo[1], lo[2]),
            spacing: self.spacing,
            directions: self.directions,
        }
    }

    /// World positions of the 8 outer voxel corners.
    pub fn corners_world(&self) -> Vec<Point3<f64>> {
        (0..8)
            .map(|c| {
                let pick = |axis: usize| {
                    if c & (1 << axis) == 0 {
                        -0.5
                    } else {
                        self.dims[axis] as f64 - 0.5
                    }
                };
                self.continuous_index_to_world(&Point3::new(pick(0), pick(1), pick(2)))
            })
            .collect()
    }

    pub fn validate(&self) -> StageResult<()> {
        if self.dims.iter().any(|d| *d == 0) {
            return Err(PipelineError::geometry(format!(
                "empty grid extent {:?}",
                self.dims
            )));
        }
        if self.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(PipelineError::geometry(format!(
                "invalid spacing {:?}",
                self.spacing.as_slice()
            )));
        }
        if self.directions.determinant().abs() <= f64::EPSILON {
            return Err(PipelineError::geometry("singular direction matrix"));
        }
        Ok(())
    }
}
