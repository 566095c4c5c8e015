//! Geometry utilities: world-space bounds, centroids and voxel grids.

pub mod bounds;
pub mod grid;

pub use bounds::{centroid, compute_bounds, Bounds};
pub use grid::{ImageGeometry, GEOMETRY_TOLERANCE};
