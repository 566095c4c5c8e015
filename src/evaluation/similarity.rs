//! Dice overlap and Hausdorff distances between two binary structures.

use crate::config::EvaluationConfig;
use crate::error::{PipelineError, StageResult};
use crate::geometry::ImageGeometry;
use crate::model::{LabelImage, NodeId, Scene};
use nalgebra::{Point3, Vector3};
use ndarray::Zip;
use rayon::prelude::*;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Voxels of padding around the structures on the comparison grid.
const GRID_MARGIN_VOXELS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HausdorffDistances {
    pub maximum: f64,
    pub average: f64,
    /// Distance at `percentile_rank` of all boundary-to-boundary distances.
    pub percentile: f64,
    pub percentile_rank: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    pub dice: f64,
    pub reference_volume_mm3: f64,
    pub compare_volume_mm3: f64,
    pub hausdorff: HausdorffDistances,
}

/// `2|A∩B| / (|A| + |B|)` of two label images on the same grid.
pub fn dice_coefficient(reference: &LabelImage, compare: &LabelImage) -> StageResult<f64> {
    if !reference.geometry.matches_exactly(&compare.geometry) {
        return Err(PipelineError::geometry("Dice requires both label images on the same grid"));
    }
    let (mut a, mut b, mut both) = (0usize, 0usize, 0usize);
    Zip::from(&reference.voxels)
        .and(&compare.voxels)
        .for_each(|&r, &c| {
            let (in_r, in_c) = (r != 0, c != 0);
            a += in_r as usize;
            b += in_c as usize;
            both += (in_r && in_c) as usize;
        });
    if a + b == 0 {
        return Err(PipelineError::geometry("both segments are empty"));
    }
    Ok(2.0 * both as f64 / (a + b) as f64)
}

/// World centres of set voxels with at least one unset 6-neighbour.
fn boundary_points(image: &LabelImage) -> Vec<Point3<f64>> {
    let [ni, nj, nk] = image.geometry.dims;
    let set = |i: isize, j: isize, k: isize| -> bool {
        if i < 0 || j < 0 || k < 0 {
            return false;
        }
        image
            .get(i as usize, j as usize, k as usize)
            .is_some_and(|v| *v != 0)
    };
    let mut points = Vec::new();
    for k in 0..nk {
        for j in 0..nj {
            for i in 0..ni {
                let (ii, jj, kk) = (i as isize, j as isize, k as isize);
                if !set(ii, jj, kk) {
                    continue;
                }
                let interior = set(ii - 1, jj, kk)
                    && set(ii + 1, jj, kk)
                    && set(ii, jj - 1, kk)
                    && set(ii, jj + 1, kk)
                    && set(ii, jj, kk - 1)
                    && set(ii, jj, kk + 1);
                if !interior {
                    points.push(image.geometry.index_to_world(i, j, k));
                }
            }
        }
    }
    points
}

/// Distance from each point of `from` to the nearest point of `to`.
fn directed_distances(from: &[Point3<f64>], to: &[Point3<f64>]) -> Vec<f64> {
    let tree = RTree::bulk_load(to.iter().map(|q| [q.x, q.y, q.z]).collect());
    from.par_iter()
        .map(|p| {
            tree.nearest_neighbor(&[p.x, p.y, p.z])
                .map(|q| (p - Point3::from(*q)).norm())
                .unwrap_or(f64::INFINITY)
        })
        .collect()
}

/// Symmetric boundary distances between two structures.
///
/// `percentile` is in `0..=100` and uses the nearest-rank definition over
/// the distances of both directions.
pub fn hausdorff_distances(
    reference: &LabelImage,
    compare: &LabelImage,
    percentile: f64,
) -> StageResult<HausdorffDistances> {
    let a = boundary_points(reference);
    let b = boundary_points(compare);
    if a.is_empty() || b.is_empty() {
        return Err(PipelineError::geometry("Hausdorff distance of an empty segment"));
    }

    let mut distances = directed_distances(&a, &b);
    distances.extend(directed_distances(&b, &a));
    distances.sort_by(|x, y| x.total_cmp(y));

    let n = distances.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    Ok(HausdorffDistances {
        maximum: distances[n - 1],
        average: distances.iter().sum::<f64>() / n as f64,
        percentile: distances[rank.clamp(1, n) - 1],
        percentile_rank: percentile,
    })
}

/// Axis-aligned grid around the occupied region of both label images, at
/// the finer of their spacings.
///
/// The grid covers the structures plus a small margin, not the full image
/// extents.
pub fn common_grid(a: &LabelImage, b: &LabelImage) -> StageResult<ImageGeometry> {
    let bounds = match (a.bounds(), b.bounds()) {
        (Some(x), Some(y)) => x.union(&y),
        (Some(x), None) | (None, Some(x)) => x,
        (None, None) => return Err(PipelineError::geometry("both segments are empty")),
    };
    let spacing = a.geometry.spacing.min().min(b.geometry.spacing.min());
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(PipelineError::geometry("invalid spacing for comparison grid"));
    }
    let margin = Vector3::repeat(GRID_MARGIN_VOXELS * spacing);
    let min = bounds.min - margin;
    let extent = bounds.extent() + margin * 2.0;
    let dims = [
        ((extent.x / spacing).round() as usize).max(1),
        ((extent.y / spacing).round() as usize).max(1),
        ((extent.z / spacing).round() as usize).max(1),
    ];
    let origin = min + Vector3::repeat(spacing / 2.0);
    Ok(ImageGeometry::axis_aligned(
        dims,
        [origin.x, origin.y, origin.z],
        [spacing; 3],
    ))
}

/// Compare two segments as currently placed in the world.
pub fn compare_segments(
    scene: &Scene,
    reference: (NodeId, &str),
    compare: (NodeId, &str),
    config: &EvaluationConfig,
    rasterization_spacing: f64,
) -> StageResult<SimilarityReport> {
    let reference_image = scene.segment_world_labelmap(reference.0, reference.1, rasterization_spacing)?;
    let compare_image = scene.segment_world_labelmap(compare.0, compare.1, rasterization_spacing)?;

    let grid = common_grid(&reference_image, &compare_image)?;
    let reference_image = reference_image.resample_nearest(&grid, |p| *p)?;
    let compare_image = compare_image.resample_nearest(&grid, |p| *p)?;
    debug!(dims = ?grid.dims, spacing = grid.spacing.x, "Comparison grid");

    let voxel_volume = grid.spacing.x * grid.spacing.y * grid.spacing.z;
    Ok(SimilarityReport {
        dice: dice_coefficient(&reference_image, &compare_image)?,
        reference_volume_mm3: reference_image.count_nonzero() as f64 * voxel_volume,
        compare_volume_mm3: compare_image.count_nonzero() as f64 * voxel_volume,
        hausdorff: hausdorff_distances(&reference_image, &compare_image, config.hausdorff_percentile)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Segment, Segmentation, SpatialTransform};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn grid() -> ImageGeometry {
        ImageGeometry::axis_aligned([12, 8, 8], [0.0; 3], [1.0; 3])
    }

    fn cube(x0: usize) -> LabelImage {
        let mut labels = LabelImage::new(grid());
        for k in 2..6 {
            for j in 2..6 {
                for i in x0..x0 + 4 {
                    labels.voxels[[k, j, i]] = 1;
                }
            }
        }
        labels
    }

    #[test]
    fn test_dice() {
        assert_relative_eq!(dice_coefficient(&cube(2), &cube(2)).unwrap(), 1.0);
        assert_relative_eq!(dice_coefficient(&cube(2), &cube(4)).unwrap(), 0.5);
        assert_relative_eq!(dice_coefficient(&cube(0), &cube(6)).unwrap(), 0.0);
    }

    #[test]
    fn test_dice_rejects_empty_and_mismatched() {
        let empty = LabelImage::new(grid());
        assert!(dice_coefficient(&empty, &empty).is_err());
        let other = LabelImage::new(ImageGeometry::axis_aligned([4, 4, 4], [0.0; 3], [1.0; 3]));
        assert!(dice_coefficient(&cube(2), &other).is_err());
    }

    #[test]
    fn test_hausdorff_of_shifted_cube() {
        let h = hausdorff_distances(&cube(2), &cube(4), 95.0).unwrap();
        assert_relative_eq!(h.maximum, 2.0, epsilon = 1e-9);
        assert!(h.average > 0.0 && h.average <= h.maximum);
        assert!(h.percentile <= h.maximum);

        let same = hausdorff_distances(&cube(2), &cube(2), 95.0).unwrap();
        assert_relative_eq!(same.maximum, 0.0);
    }

    #[test]
    fn test_hausdorff_matches_exhaustive_search() {
        let mut irregular = cube(2);
        irregular.voxels[[6, 6, 9]] = 1;
        irregular.voxels[[1, 7, 11]] = 1;
        let h = hausdorff_distances(&cube(4), &irregular, 100.0).unwrap();

        let (a, b) = (boundary_points(&cube(4)), boundary_points(&irregular));
        let nearest = |p: &Point3<f64>, set: &[Point3<f64>]| {
            set.iter().map(|q| (p - q).norm()).fold(f64::INFINITY, f64::min)
        };
        let mut all: Vec<f64> = a.iter().map(|p| nearest(p, &b)).collect();
        all.extend(b.iter().map(|p| nearest(p, &a)));
        let maximum = all.iter().cloned().fold(0.0, f64::max);
        let average = all.iter().sum::<f64>() / all.len() as f64;

        assert_relative_eq!(h.maximum, maximum, epsilon = 1e-9);
        assert_relative_eq!(h.average, average, epsilon = 1e-9);
        assert_relative_eq!(h.percentile, maximum, epsilon = 1e-9);
    }

    #[test]
    fn test_common_grid_covers_structures_only() {
        let large = ImageGeometry::axis_aligned([100, 100, 100], [0.0; 3], [1.0; 3]);
        let mut a = LabelImage::new(large.clone());
        let mut b = LabelImage::new(large);
        for k in 40..44 {
            for j in 40..44 {
                for i in 40..44 {
                    a.voxels[[k, j, i]] = 1;
                    b.voxels[[k, j, i + 2]] = 1;
                }
            }
        }
        let grid = common_grid(&a, &b).unwrap();
        // Structures span [39.5, 45.5] in x and [39.5, 43.5] elsewhere, plus 2 voxels each side.
        assert_eq!(grid.dims, [10, 8, 8]);
        assert_relative_eq!(grid.origin.x, 38.0, epsilon = 1e-9);
        assert_relative_eq!(grid.origin.y, 38.0, epsilon = 1e-9);

        let empty = LabelImage::new(a.geometry.clone());
        assert_eq!(common_grid(&a, &empty).unwrap().dims, [8, 8, 8]);
        assert!(common_grid(&empty, &empty).is_err());
    }

    #[test]
    fn test_compare_segments_follows_applied_transform() {
        let mut scene = Scene::new();
        let fixed = scene.add_segmentation(
            "US segmentation",
            Segmentation::new().with_segment(Segment::from_labelmap("1", "prostate", cube(2))),
        );
        let moving = scene.add_segmentation(
            "MR segmentation",
            Segmentation::new().with_segment(Segment::from_labelmap("1", "prostate", cube(4))),
        );
        let config = EvaluationConfig::default();

        let before = compare_segments(&scene, (fixed, "prostate"), (moving, "prostate"), &config, 1.0).unwrap();
        assert_relative_eq!(before.dice, 0.5, epsilon = 1e-9);
        assert_relative_eq!(before.reference_volume_mm3, 64.0, epsilon = 1e-9);

        let t = scene.add_transform("Affine Transform", SpatialTransform::translation(Vector3::new(-2.0, 0.0, 0.0)));
        scene.set_parent_transform(moving, Some(t)).unwrap();
        let after = compare_segments(&scene, (fixed, "prostate"), (moving, "prostate"), &config, 1.0).unwrap();
        assert_relative_eq!(after.dice, 1.0, epsilon = 1e-9);
        assert_relative_eq!(after.hausdorff.maximum, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_segment_is_reported() {
        let mut scene = Scene::new();
        let fixed = scene.add_segmentation("US segmentation", Segmentation::new());
        let err = compare_segments(&scene, (fixed, "prostate"), (fixed, "prostate"), &EvaluationConfig::default(), 1.0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
    }
}
