use crate::geometry::ImageGeometry;
use nalgebra::{Point3, Vector3};
use ndarray::Array3;
use std::fmt;

/// Axis-aligned world-space bounding box, `[xmin, xmax, ymin, ymax, zmin, zmax]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Bounds {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Build from the interleaved `[xmin, xmax, ymin, ymax, zmin, zmax]` layout.
    pub fn from_array(b: [f64; 6]) -> Self {
        Self {
            min: Point3::new(b[0], b[2], b[4]),
            max: Point3::new(b[1], b[3], b[5]),
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.min.x, self.max.x, self.min.y, self.max.y, self.min.z, self.max.z,
        ]
    }

    /// Arithmetic midpoint of each axis pair.
    pub fn centroid(&self) -> Point3<f64> {
        Point3::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// True when any axis has a non-positive or non-finite extent.
    pub fn is_degenerate(&self) -> bool {
        self.extent()
            .iter()
            .any(|e| !e.is_finite() || *e <= 0.0)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    pub fn translated(&self, offset: &Vector3<f64>) -> Bounds {
        Bounds {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// The 8 corner points.
    pub fn corners(&self) -> [Point3<f64>; 8] {
        std::array::from_fn(|c| {
            Point3::new(
                if c & 1 == 0 { self.min.x } else { self.max.x },
                if c & 2 == 0 { self.min.y } else { self.max.y },
                if c & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Smallest box containing all given points. `None` for an empty iterator.
    pub fn enclosing<I: IntoIterator<Item = Point3<f64>>>(points: I) -> Option<Bounds> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Bounds::new(first, first);
        for p in iter {
            bounds = bounds.union(&Bounds::new(p, p));
        }
        Some(bounds)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_array();
        write!(
            f,
            "[{:.3}, {:.3}, {:.3}, {:.3}, {:.3}, {:.3}]",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// World-space bounds of the non-zero voxels of a mask.
///
/// Voxels are treated as boxes centered on their index, so the result spans
/// voxel corners. Returns `None` when no voxel is set.
pub fn compute_bounds(geometry: &ImageGeometry, mask: &Array3<u8>) -> Option<Bounds> {
    let mut lo = [usize::MAX; 3];
    let mut hi = [0usize; 3];
    let mut any = false;

    for ((k, j, i), &value) in mask.indexed_iter() {
        if value == 0 {
            continue;
        }
        any = true;
        for (axis, idx) in [i, j, k].into_iter().enumerate() {
            lo[axis] = lo[axis].min(idx);
            hi[axis] = hi[axis].max(idx);
        }
    }

    if !any {
        return None;
    }

    let corners = (0..8).map(|c| {
        let pick = |axis: usize| {
            if c & (1 << axis) == 0 {
                lo[axis] as f64 - 0.5
            } else {
                hi[axis] as f64 + 0.5
            }
        };
        geometry.continuous_index_to_world(&Point3::new(pick(0), pick(1), pick(2)))
    });
    Bounds::enclosing(corners)
}

/// Centroid of an optional bounds value; `None` propagates the not-found condition.
pub fn centroid(bounds: Option<&Bounds>) -> Option<Point3<f64>> {
    bounds.map(Bounds::centroid)
}
