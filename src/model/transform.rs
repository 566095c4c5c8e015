//! Spatial transforms and transform chains.
//!
//! Linear transforms are stored in the *to parent* direction, the convention
//! used for moving a node's geometry into its parent (world) frame.
//! Deformable transforms are stored as displacement fields in the *from
//! parent* direction, the direction needed to resample an image.

use crate::geometry::ImageGeometry;
use nalgebra::{Matrix4, Point3, Vector3};
use ndarray::Array3;

const INVERSION_ITERATIONS: usize = 32;
const INVERSION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Linear,
    Deformable,
}

/// Dense displacement field sampled on a voxel grid.
///
/// For a world point `p` in the parent frame, the corresponding point in
/// the child frame is `p + d(p)`. Outside the grid the displacement is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementField {
    pub geometry: ImageGeometry,
    pub vectors: Array3<Vector3<f64>>,
}

impl DisplacementField {
    pub fn zeros(geometry: ImageGeometry) -> Self {
        let vectors = Array3::from_elem(geometry.shape(), Vector3::zeros());
        Self { geometry, vectors }
    }

    /// Field with the same displacement everywhere on the grid.
    pub fn uniform(geometry: ImageGeometry, displacement: Vector3<f64>) -> Self {
        let vectors = Array3::from_elem(geometry.shape(), displacement);
        Self { geometry, vectors }
    }

    pub fn is_zero(&self) -> bool {
        self.vectors.iter().all(|v| v.norm() == 0.0)
    }

    /// Trilinear interpolation of the displacement at a world point.
    pub fn sample(&self, point: &Point3<f64>) -> Vector3<f64> {
        let Some(index) = self.geometry.world_to_continuous_index(point) else {
            return Vector3::zeros();
        };
        let (nk, nj, ni) = self.vectors.dim();
        let dims = [ni, nj, nk];
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let c = index[axis];
            if c < -0.5 || c > dims[axis] as f64 - 0.5 {
                return Vector3::zeros();
            }
            let clamped = c.clamp(0.0, (dims[axis] - 1) as f64);
            let floor = clamped.floor();
            base[axis] = floor as usize;
            frac[axis] = clamped - floor;
        }

        let mut acc = Vector3::zeros();
        for corner in 0..8 {
            let mut weight = 1.0;
            let mut idx = [0usize; 3];
            for axis in 0..3 {
                let upper = corner & (1 << axis) != 0;
                idx[axis] = (base[axis] + upper as usize).min(dims[axis] - 1);
                weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
            }
            if weight > 0.0 {
                acc += self.vectors[[idx[2], idx[1], idx[0]]] * weight;
            }
        }
        acc
    }
}

/// A spatial mapping bound to nodes of the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialTransform {
    Linear(Matrix4<f64>),
    Deformable(DisplacementField),
}

impl Default for SpatialTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SpatialTransform {
    pub fn identity() -> Self {
        Self::Linear(Matrix4::identity())
    }

    pub fn translation(offset: Vector3<f64>) -> Self {
        Self::Linear(Matrix4::new_translation(&offset))
    }

    pub fn kind(&self) -> TransformKind {
        match self {
            Self::Linear(_) => TransformKind::Linear,
            Self::Deformable(_) => TransformKind::Deformable,
        }
    }

    pub fn as_linear(&self) -> Option<&Matrix4<f64>> {
        match self {
            Self::Linear(m) => Some(m),
            Self::Deformable(_) => None,
        }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            Self::Linear(m) => (m - Matrix4::identity()).abs().max() <= 1e-12,
            Self::Deformable(field) => field.is_zero(),
        }
    }

    /// Map a point from the parent frame into the child frame.
    pub fn from_parent_point(&self, point: &Point3<f64>) -> Point3<f64> {
        match self {
            Self::Linear(m) => m
                .try_inverse()
                .map(|inv| inv.transform_point(point))
                .unwrap_or(*point),
            Self::Deformable(field) => *point + field.sample(point),
        }
    }

    /// Map a point from the child frame into the parent frame.
    ///
    /// For displacement fields the inverse is found by fixed-point iteration.
    pub fn to_parent_point(&self, point: &Point3<f64>) -> Point3<f64> {
        match self {
            Self::Linear(m) => m.transform_point(point),
            Self::Deformable(field) => {
                let mut estimate = *point;
                for _ in 0..INVERSION_ITERATIONS {
                    let next = *point - field.sample(&estimate);
                    let step = (next - estimate).norm();
                    estimate = next;
                    if step < INVERSION_TOLERANCE {
                        break;
                    }
                }
                estimate
            }
        }
    }
}

/// Transforms applied above a node, nearest parent first.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    pub transforms: Vec<SpatialTransform>,
}

impl TransformChain {
    pub fn new(transforms: Vec<SpatialTransform>) -> Self {
        Self { transforms }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.transforms.iter().all(SpatialTransform::is_identity)
    }

    /// Composite to-world matrix when every link is linear.
    pub fn as_linear(&self) -> Option<Matrix4<f64>> {
        self.transforms
            .iter()
            .try_fold(Matrix4::identity(), |acc, t| t.as_linear().map(|m| m * acc))
    }

    pub fn to_world_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.transforms
            .iter()
            .fold(*point, |p, t| t.to_parent_point(&p))
    }

    pub fn from_world_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.transforms
            .iter()
            .rev()
            .fold(*point, |p, t| t.from_parent_point(&p))
    }
}
