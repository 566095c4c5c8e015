//! Translation-only pre-alignment of the moving structure onto the fixed one.

use crate::config::Config;
use crate::error::StageResult;
use crate::model::{Scene, SpatialTransform};
use crate::pipeline::context::{required, required_name, PipelineContext};
use nalgebra::Vector3;
use tracing::info;

/// Move the moving volume, moving segmentation and cropped volume so that
/// the moving structure's centroid lands on the fixed structure's centroid.
///
/// Returns the applied translation. Every input is checked before the scene
/// is touched. Transforms already observed by the three targets are hardened
/// first so the translation is applied in world space.
pub fn pre_align_segmentations(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    config: &Config,
) -> StageResult<Vector3<f64>> {
    let fixed_segmentation = required(ctx.fixed_segmentation, "fixed segmentation")?;
    let moving_segmentation = required(ctx.moving_segmentation, "moving segmentation")?;
    let moving_volume = required(ctx.moving_volume, "moving volume")?;
    let cropped_volume = required(ctx.cropped_volume, "cropped moving volume")?;
    let fixed_segment = required_name(&ctx.fixed_segment_name, "fixed segment name")?;
    let moving_segment = required_name(&ctx.moving_segment_name, "moving segment name")?;
    scene.require_volume(moving_volume)?;
    scene.require_volume(cropped_volume)?;

    let fixed_bounds = scene.segment_world_bounds(fixed_segmentation, Some(fixed_segment))?;
    let moving_bounds = scene.segment_world_bounds(moving_segmentation, Some(moving_segment))?;
    let translation = fixed_bounds.centroid() - moving_bounds.centroid();

    let name = scene.generate_unique_name(&config.naming.prealignment_transform);
    let transform = scene.add_transform(name, SpatialTransform::translation(translation));
    scene.set_folder(transform, scene.folder_of(moving_volume))?;

    for target in [moving_volume, moving_segmentation, cropped_volume] {
        scene.harden_transform(target)?;
        scene.set_parent_transform(target, Some(transform))?;
        scene.harden_transform(target)?;
    }

    ctx.prealignment_transform = Some(transform);
    ctx.prealignment_translation = Some(translation);
    info!(
        fixed_centroid = ?fixed_bounds.centroid(),
        moving_centroid = ?moving_bounds.centroid(),
        translation = ?translation,
        "Segmentations pre-aligned"
    );
    Ok(translation)
}
