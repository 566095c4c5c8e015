//! Registration quality measures: structure overlap and fiducial distances.

pub mod fiducials;
pub mod similarity;

pub use fiducials::{calculate_fiducial_errors, Fiducial, FiducialErrorColumn, FiducialErrorTable, FiducialList};
pub use similarity::{
    common_grid, compare_segments, dice_coefficient, hausdorff_distances, HausdorffDistances, SimilarityReport,
};
