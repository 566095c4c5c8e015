//! Cropping the moving volume around the moving structure.

use crate::config::{Config, CroppingConfig};
use crate::engines::CropEngine;
use crate::error::{PipelineError, StageResult};
use crate::geometry::Bounds;
use crate::model::{NodeData, NodeId, Roi, Scene, Volume};
use crate::pipeline::context::{required, PipelineContext};
use crate::pipeline::stages::{hardened_copy, record_intermediate};
use nalgebra::Vector3;
use tracing::{debug, info};

/// ROI centred on the structure with a margin scaled from its extent.
///
/// The in-plane radius uses the x extent on both in-plane axes.
pub fn compute_crop_roi(bounds: &Bounds, config: &CroppingConfig) -> StageResult<Roi> {
    if bounds.is_degenerate() {
        return Err(PipelineError::geometry(format!(
            "cannot crop around degenerate bounds {}",
            bounds
        )));
    }
    let extent = bounds.extent();
    let in_plane = config.in_plane_factor * extent.x / 2.0;
    let through_plane = config.through_plane_factor * extent.z / 2.0;
    Ok(Roi::new(
        bounds.centroid(),
        Vector3::new(in_plane, in_plane, through_plane),
    ))
}

/// Crop the moving volume to the ROI around the moving structure.
///
/// Without a moving segment name the bounds of the whole moving
/// segmentation are used. The output is filed next to the moving volume.
pub fn crop_moving_volume(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    config: &Config,
    engine: &dyn CropEngine,
) -> StageResult<NodeId> {
    let volume_id = required(ctx.moving_volume, "moving volume")?;
    let segmentation_id = required(ctx.moving_segmentation, "moving segmentation")?;
    scene.require_volume(volume_id)?;
    let bounds = scene.segment_world_bounds(segmentation_id, ctx.moving_segment_name.as_deref())?;
    let roi = compute_crop_roi(&bounds, &config.cropping)?;
    debug!(bounds = %bounds, center = ?roi.center, radius = ?roi.radius, "Crop ROI computed");

    let voxel_based = config.cropping.voxel_based;
    let chain = scene.transform_chain(volume_id);
    let cropped = if chain.is_empty() {
        engine.crop(scene.require_volume(volume_id)?, &roi, voxel_based)?
    } else if chain.as_linear().is_some() {
        let placed = Volume {
            geometry: scene.world_geometry(volume_id)?,
            voxels: scene.require_volume(volume_id)?.voxels.clone(),
        };
        engine.crop(&placed, &roi, voxel_based)?
    } else {
        // Deformable placement is resampled into a temporary hardened copy.
        let copy = hardened_copy(scene, volume_id)?;
        let result = scene
            .require_volume(copy)
            .map(|hardened| engine.crop(hardened, &roi, voxel_based));
        scene.remove(copy);
        debug!("Moving volume hardened through a deformable transform for cropping");
        result??
    };

    let volume_name = scene.require(volume_id)?.name.clone();
    let study = scene.folder_of(volume_id);
    let dims = cropped.geometry.dims;

    let cropped_name = scene.generate_unique_name(&format!("{}_Cropped", volume_name));
    let cropped_id = scene.add_volume(cropped_name.as_str(), cropped);
    scene.set_folder(cropped_id, study)?;
    record_intermediate(scene, &mut ctx.cropped_volume, cropped_id);

    let roi_name = scene.generate_unique_name(&format!("CropROI_{}", volume_name));
    let roi_id = scene.add_node(roi_name, NodeData::Roi(roi));
    if config.pipeline.keep_intermediates {
        scene.set_folder(roi_id, study)?;
        scene.set_visible(roi_id, false)?;
        record_intermediate(scene, &mut ctx.crop_roi, roi_id);
    } else {
        scene.remove(roi_id);
    }

    info!(
        volume = %volume_name,
        output = %cropped_name,
        dims = ?dims,
        engine = engine.name(),
        "Moving volume cropped"
    );
    Ok(cropped_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::VoxelCropEngine;
    use crate::geometry::ImageGeometry;
    use crate::model::{DisplacementField, FolderLevel, LabelImage, Segment, Segmentation, SpatialTransform};
    use nalgebra::Vector3;
    use approx::assert_relative_eq;

    fn moving_scene() -> (Scene, PipelineContext) {
        let geometry = ImageGeometry::axis_aligned([20, 20, 20], [0.0; 3], [1.0; 3]);
        let mut labels = LabelImage::new(geometry.clone());
        for k in 8..12 {
            for j in 8..12 {
                for i in 8..12 {
                    labels.voxels[[k, j, i]] = 1;
                }
            }
        }
        let mut scene = Scene::new();
        let study = scene.add_folder("MR study", FolderLevel::Study, None);
        let volume = scene.add_volume("MR", Volume::new(geometry));
        scene.set_folder(volume, Some(study)).unwrap();
        let segmentation = scene.add_segmentation(
            "MR segmentation",
            Segmentation::new().with_segment(Segment::from_labelmap("1", "prostate", labels)),
        );
        let mut ctx = PipelineContext::new();
        ctx.moving_volume = Some(volume);
        ctx.moving_segmentation = Some(segmentation);
        ctx.moving_segment_name = Some("prostate".to_string());
        (scene, ctx)
    }

    #[test]
    fn test_roi_margin() {
        let bounds = Bounds::from_array([0.0, 10.0, 0.0, 20.0, 0.0, 30.0]);
        let roi = compute_crop_roi(&bounds, &CroppingConfig::default()).unwrap();
        assert_relative_eq!(roi.center.y, 10.0);
        assert_relative_eq!(roi.radius.x, 15.0);
        assert_relative_eq!(roi.radius.y, 15.0);
        assert_relative_eq!(roi.radius.z, 30.0);
    }

    #[test]
    fn test_degenerate_bounds_are_rejected() {
        let bounds = Bounds::from_array([0.0, 10.0, 5.0, 5.0, 0.0, 30.0]);
        let err = compute_crop_roi(&bounds, &CroppingConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Geometry(_)));
    }

    #[test]
    fn test_crop_files_output_and_drops_roi() {
        let (mut scene, mut ctx) = moving_scene();
        let cropped =
            crop_moving_volume(&mut scene, &mut ctx, &Config::default(), &VoxelCropEngine::new()).unwrap();

        // Bounds [7.5, 11.5] on every axis: radius 6 in plane, 4 through plane.
        assert_eq!(scene.volume(cropped).unwrap().geometry.dims, [12, 12, 8]);
        assert_eq!(scene.name(cropped), Some("MR_Cropped"));
        assert_eq!(scene.folder_of(cropped), scene.folder_of(ctx.moving_volume.unwrap()));
        assert!(scene.find_by_name("CropROI_MR").is_none());
        assert!(ctx.crop_roi.is_none());
    }

    #[test]
    fn test_crop_under_deformable_transform() {
        let (mut scene, mut ctx) = moving_scene();
        // Displacement of -2 mm in x places the moving data 2 mm further along x.
        let field_grid = ImageGeometry::axis_aligned([40, 40, 40], [-10.0; 3], [1.0; 3]);
        let field = DisplacementField::uniform(field_grid, Vector3::new(-2.0, 0.0, 0.0));
        let t = scene.add_transform("Deformable Transform", SpatialTransform::Deformable(field));
        let volume = ctx.moving_volume.unwrap();
        scene.set_parent_transform(volume, Some(t)).unwrap();
        scene.set_parent_transform(ctx.moving_segmentation.unwrap(), Some(t)).unwrap();
        let before = scene.len();

        let cropped =
            crop_moving_volume(&mut scene, &mut ctx, &Config::default(), &VoxelCropEngine::new()).unwrap();

        let geometry = &scene.volume(cropped).unwrap().geometry;
        assert_eq!(geometry.dims, [12, 12, 8]);
        assert_relative_eq!(geometry.origin.x, 6.0, epsilon = 1e-9);
        assert_relative_eq!(geometry.origin.y, 4.0, epsilon = 1e-9);
        // Only the cropped output remains; the source keeps its binding.
        assert_eq!(scene.len(), before + 1);
        assert_eq!(scene.parent_transform(volume), Some(t));
    }

    #[test]
    fn test_kept_roi_is_hidden() {
        let (mut scene, mut ctx) = moving_scene();
        let mut config = Config::default();
        config.pipeline.keep_intermediates = true;
        crop_moving_volume(&mut scene, &mut ctx, &config, &VoxelCropEngine::new()).unwrap();

        let roi = ctx.crop_roi.unwrap();
        assert!(!scene.node(roi).unwrap().visible);
        assert!(scene.roi(roi).is_some());
    }

    #[test]
    fn test_missing_segment_produces_no_output() {
        let (mut scene, mut ctx) = moving_scene();
        ctx.moving_segment_name = Some("bladder".to_string());
        let before = scene.len();
        let err = crop_moving_volume(&mut scene, &mut ctx, &Config::default(), &VoxelCropEngine::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
        assert_eq!(scene.len(), before);
        assert!(ctx.cropped_volume.is_none());
    }
}
