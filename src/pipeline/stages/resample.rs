//! Isotropic resampling of the fixed volume.

use crate::config::Config;
use crate::engines::{ResampleParameters, ResamplingEngine};
use crate::error::StageResult;
use crate::model::{NodeId, Scene};
use crate::pipeline::context::{required, PipelineContext};
use crate::pipeline::stages::{hardened_copy, record_intermediate};
use nalgebra::Vector3;
use tracing::{debug, info};

/// Resample the fixed volume onto the configured isotropic spacing.
///
/// The resampling engine does not resolve parent transforms, so a fixed
/// volume with a non-identity transform (or any fixed volume when the
/// always-harden policy is set) is replaced by a hardened clone first.
pub fn resample_fixed_volume(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    config: &Config,
    engine: &dyn ResamplingEngine,
) -> StageResult<NodeId> {
    let fixed = required(ctx.fixed_volume, "fixed volume")?;
    scene.require_volume(fixed)?;
    let fixed_name = scene.require(fixed)?.name.clone();

    let source = if config.pipeline.always_harden_copies || scene.has_non_identity_transform(fixed) {
        let copy = hardened_copy(scene, fixed)?;
        debug!(source = %fixed_name, "Fixed volume hardened into a copy for resampling");
        record_intermediate(scene, &mut ctx.fixed_volume_hardened, copy);
        copy
    } else {
        fixed
    };

    let parameters = ResampleParameters {
        spacing: Vector3::from(config.resampling.spacing),
        interpolation: config.resampling.interpolation,
    };
    let output = engine.resample(scene.require_volume(source)?, &parameters)?;
    let dims = output.geometry.dims;

    let [sx, sy, sz] = config.resampling.spacing;
    let name = scene.generate_unique_name(&format!("{}_Resampled_{}x{}x{}mm", fixed_name, sx, sy, sz));
    let resampled = scene.add_volume(name.as_str(), output);
    scene.set_folder(resampled, scene.folder_of(fixed))?;
    record_intermediate(scene, &mut ctx.resampled_volume, resampled);

    info!(
        volume = %fixed_name,
        output = %name,
        dims = ?dims,
        interpolation = ?parameters.interpolation,
        engine = engine.name(),
        "Fixed volume resampled"
    );
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowPreset;
    use crate::engines::LanczosResampler;
    use crate::error::PipelineError;
    use crate::geometry::ImageGeometry;
    use crate::model::{FolderLevel, SpatialTransform, Volume};

    fn fixed_scene() -> (Scene, PipelineContext) {
        let mut scene = Scene::new();
        let study = scene.add_folder("US study", FolderLevel::Study, None);
        let mut volume = Volume::new(ImageGeometry::axis_aligned([8, 8, 4], [0.0; 3], [0.5, 0.5, 2.0]));
        volume.voxels.fill(10.0);
        let fixed = scene.add_volume("US", volume);
        scene.set_folder(fixed, Some(study)).unwrap();
        let mut ctx = PipelineContext::new();
        ctx.fixed_volume = Some(fixed);
        (scene, ctx)
    }

    #[test]
    fn test_resampled_volume_is_isotropic_and_filed() {
        let (mut scene, mut ctx) = fixed_scene();
        let id = resample_fixed_volume(&mut scene, &mut ctx, &Config::default(), &LanczosResampler::default())
            .unwrap();
        let volume = scene.volume(id).unwrap();
        assert_eq!(volume.geometry.dims, [4, 4, 8]);
        assert_eq!(scene.name(id), Some("US_Resampled_1x1x1mm"));
        assert_eq!(scene.folder_of(id), scene.folder_of(ctx.fixed_volume.unwrap()));
        assert!(ctx.fixed_volume_hardened.is_none());
    }

    #[test]
    fn test_transformed_fixed_volume_is_hardened_first() {
        let (mut scene, mut ctx) = fixed_scene();
        let fixed = ctx.fixed_volume.unwrap();
        let t = scene.add_transform("T", SpatialTransform::translation(Vector3::new(0.0, 0.0, 5.0)));
        scene.set_parent_transform(fixed, Some(t)).unwrap();

        resample_fixed_volume(&mut scene, &mut ctx, &Config::default(), &LanczosResampler::default()).unwrap();
        let copy = ctx.fixed_volume_hardened.unwrap();
        assert!(scene.parent_transform(copy).is_none());
        assert_eq!(scene.parent_transform(fixed), Some(t));
    }

    #[test]
    fn test_prostate_preset_always_hardens() {
        let (mut scene, mut ctx) = fixed_scene();
        let config = Config::for_preset(WorkflowPreset::Prostate);
        resample_fixed_volume(&mut scene, &mut ctx, &config, &LanczosResampler::default()).unwrap();
        assert!(ctx.fixed_volume_hardened.is_some());
    }

    #[test]
    fn test_engine_rejection_propagates() {
        let (mut scene, mut ctx) = fixed_scene();
        let mut config = Config::default();
        config.resampling.spacing = [0.0, 1.0, 1.0];
        let err = resample_fixed_volume(&mut scene, &mut ctx, &config, &LanczosResampler::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Engine(_)));
        assert!(ctx.resampled_volume.is_none());
    }
}
