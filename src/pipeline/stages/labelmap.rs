//! Export of the fixed and moving structures as co-registered label maps.

use crate::config::{Config, LabelMapFiling};
use crate::error::{PipelineError, StageResult};
use crate::geometry::ImageGeometry;
use crate::model::{LabelImage, LabelMapVolume, NodeId, Scene};
use crate::pipeline::context::{required, required_name, PipelineContext};
use crate::pipeline::stages::{hardened_copy, record_intermediate};
use tracing::{debug, info};

/// Export both structures onto the cropped moving volume's grid.
///
/// Returns the `(fixed, moving)` label map nodes. A missing segmentation or
/// segment fails the stage before anything is created. When only one of the
/// two exports succeeds the stage reports a consistency failure.
pub fn create_structure_labelmaps(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    config: &Config,
) -> StageResult<(NodeId, NodeId)> {
    let fixed_segmentation = required(ctx.fixed_segmentation, "fixed segmentation")?;
    let moving_segmentation = required(ctx.moving_segmentation, "moving segmentation")?;
    let fixed_segment = required_name(&ctx.fixed_segment_name, "fixed segment name")?.to_string();
    let moving_segment = required_name(&ctx.moving_segment_name, "moving segment name")?.to_string();
    let reference_volume = required(ctx.cropped_volume, "cropped moving volume")?;
    scene.require_segmentation(fixed_segmentation)?.require_segment(&fixed_segment)?;
    scene.require_segmentation(moving_segmentation)?.require_segment(&moving_segment)?;
    let reference = scene.world_geometry(reference_volume)?;

    let always_harden = config.pipeline.always_harden_copies;
    let fixed_source = if always_harden || scene.has_non_identity_transform(fixed_segmentation) {
        let copy = hardened_copy(scene, fixed_segmentation)?;
        record_intermediate(scene, &mut ctx.fixed_segmentation_hardened, copy);
        copy
    } else {
        fixed_segmentation
    };
    let moving_source = if always_harden || scene.has_non_identity_transform(moving_segmentation) {
        let copy = hardened_copy(scene, moving_segmentation)?;
        record_intermediate(scene, &mut ctx.moving_segmentation_hardened, copy);
        copy
    } else {
        moving_segmentation
    };

    let spacing = config.label_maps.rasterization_spacing;
    for source in [fixed_source, moving_source] {
        if let Some(segmentation) = scene.segmentation_mut(source) {
            let converted = segmentation.create_binary_labelmap_representation(spacing);
            if converted > 0 {
                debug!(segments = converted, "Binary label map representation created");
            }
        }
    }

    let fixed_image = export_on_reference(scene, fixed_source, &fixed_segment, spacing, &reference);
    let moving_image = export_on_reference(scene, moving_source, &moving_segment, spacing, &reference);
    let (fixed_image, moving_image) = match (fixed_image, moving_image) {
        (Ok(fixed), Ok(moving)) => (fixed, moving),
        (Err(e), Err(_)) => return Err(e),
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => {
            return Err(PipelineError::consistency(format!(
                "only one of the paired label maps could be exported: {}",
                e
            )))
        }
    };

    let fixed_name = scene.generate_unique_name(&config.naming.fixed_label_map);
    let fixed_label_map = scene.add_label_map(fixed_name.as_str(), LabelMapVolume::from_image(fixed_image));
    let moving_name = scene.generate_unique_name(&config.naming.moving_label_map);
    let moving_label_map = scene.add_label_map(moving_name.as_str(), LabelMapVolume::from_image(moving_image));

    let fixed_study = ctx.fixed_volume.and_then(|v| scene.folder_of(v));
    let moving_study = ctx.moving_volume.and_then(|v| scene.folder_of(v));
    let (fixed_folder, moving_folder) = match config.pipeline.label_map_filing {
        LabelMapFiling::Crossed => (moving_study, fixed_study),
        LabelMapFiling::SameStudy => (fixed_study, moving_study),
    };
    scene.set_folder(fixed_label_map, fixed_folder)?;
    scene.set_folder(moving_label_map, moving_folder)?;

    record_intermediate(scene, &mut ctx.fixed_label_map, fixed_label_map);
    record_intermediate(scene, &mut ctx.moving_label_map, moving_label_map);

    info!(
        fixed = %fixed_name,
        moving = %moving_name,
        dims = ?reference.dims,
        filing = ?config.pipeline.label_map_filing,
        "Structure label maps created"
    );
    Ok((fixed_label_map, moving_label_map))
}

/// Standalone copy of a segment's label map on the reference grid.
fn export_on_reference(
    scene: &Scene,
    segmentation: NodeId,
    segment: &str,
    rasterization_spacing: f64,
    reference: &ImageGeometry,
) -> StageResult<LabelImage> {
    let image = scene.segment_world_labelmap(segmentation, segment, rasterization_spacing)?;
    if image.geometry.matches_exactly(reference) {
        return Ok(image);
    }
    debug!(segment, from = ?image.geometry.dims, to = ?reference.dims, "Label map resampled onto reference grid");
    image.resample_nearest(reference, |p| *p)
}
