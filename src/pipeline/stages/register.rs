//! Distance-map based registration of the moving structure onto the fixed one.

use crate::config::Config;
use crate::engines::{engine_artifact_names, RegistrationEngine, RegistrationRequest};
use crate::error::{EngineError, PipelineError, StageResult};
use crate::model::{NodeId, Scene, SpatialTransform};
use crate::pipeline::cleanup::remove_intermediates;
use crate::pipeline::context::{required, PipelineContext};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Run the registration engine on the prepared volumes and label maps.
///
/// Two fresh transform nodes receive the affine and deformable results.
/// Engine errors and panics are converted into [`PipelineError::Engine`]
/// and the output nodes are discarded. After a successful call the
/// intermediates are removed unless the run keeps them.
pub fn perform_distance_based_registration(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    config: &Config,
    engine: &mut dyn RegistrationEngine,
) -> StageResult<()> {
    let fixed_volume = required(ctx.effective_fixed_volume(), "fixed volume")?;
    let moving_volume = required(ctx.moving_volume, "moving volume")?;
    let fixed_label_map = required(ctx.fixed_label_map, "fixed label map")?;
    let moving_label_map = required(ctx.moving_label_map, "moving label map")?;
    scene.require_volume(fixed_volume)?;
    scene.require_volume(moving_volume)?;
    let fixed_grid = scene.require_label_map(fixed_label_map)?.geometry().clone();
    scene.require_label_map(moving_label_map)?;

    for input in [fixed_volume, moving_volume, fixed_label_map, moving_label_map] {
        if scene.has_non_identity_transform(input) {
            return Err(PipelineError::precondition(format!(
                "'{}' carries an unresolved transform",
                scene.require(input)?.name
            )));
        }
    }

    if !scene.require_label_map(moving_label_map)?.geometry().matches_exactly(&fixed_grid) {
        let regridded = scene
            .require_label_map(moving_label_map)?
            .image
            .resample_nearest(&fixed_grid, |p| *p)?;
        if let Some(label_map) = scene.label_map_mut(moving_label_map) {
            label_map.image = regridded;
        }
        warn!("Moving label map resampled onto the fixed label map grid");
    }

    let moving_study = scene.folder_of(moving_volume);
    let affine_name = scene.generate_unique_name(&config.naming.affine_transform);
    let affine = scene.add_transform(affine_name, SpatialTransform::identity());
    let deformable_name = scene.generate_unique_name(&config.naming.deformable_transform);
    let deformable = scene.add_transform(deformable_name, SpatialTransform::identity());
    scene.set_folder(affine, moving_study)?;
    scene.set_folder(deformable, moving_study)?;

    let request = RegistrationRequest {
        fixed_volume,
        fixed_label_map,
        moving_volume,
        moving_label_map,
        affine_output: affine,
        deformable_output: deformable,
    };
    let engine_name = engine.name().to_string();
    info!(engine = %engine_name, ?request, "Starting distance map based registration");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.register(scene, &request)))
        .unwrap_or_else(|payload| {
            Err(EngineError::Panicked {
                engine: engine_name.clone(),
                message: panic_message(payload.as_ref()),
            })
        });

    if let Err(e) = outcome {
        scene.remove(affine);
        scene.remove(deformable);
        error!(engine = %engine_name, error = %e, "Registration engine failed");
        return Err(e.into());
    }
    if scene.transform(affine).is_none() || scene.transform(deformable).is_none() {
        for output in [affine, deformable] {
            if scene.transform(output).is_some() {
                scene.remove(output);
            }
        }
        return Err(PipelineError::consistency(
            "registration engine did not leave both output transforms in the scene",
        ));
    }

    ctx.affine_transform = Some(affine);
    ctx.deformable_transform = Some(deformable);
    info!(engine = %engine_name, "Registration completed");

    // The engine call has returned, so nothing references the intermediates.
    if config.pipeline.keep_intermediates {
        file_engine_artifacts(scene, ctx, config);
    } else {
        ctx.cleanup_report = Some(remove_intermediates(scene, ctx, &config.naming, false));
    }
    Ok(())
}

/// File the scratch nodes the engine created under the moving study.
fn file_engine_artifacts(scene: &mut Scene, ctx: &PipelineContext, config: &Config) {
    let Some(study) = ctx.moving_volume.and_then(|v| scene.folder_of(v)) else {
        return;
    };
    let labels: Vec<String> = [ctx.fixed_label_map, ctx.moving_label_map]
        .into_iter()
        .flatten()
        .filter_map(|id| scene.name(id).map(str::to_string))
        .collect();
    let names = labels
        .iter()
        .flat_map(|label| engine_artifact_names(label))
        .chain(std::iter::once(config.naming.moving_image_copy.clone()));
    let artifacts: Vec<NodeId> = names.filter_map(|name| scene.find_by_name(&name)).collect();
    for id in artifacts {
        if scene.set_folder(id, Some(study)).is_ok() {
            debug!(node = ?scene.name(id), "Engine artifact filed under moving study");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ImageGeometry;
    use crate::model::{FolderLevel, LabelImage, LabelMapVolume, Volume};
    use nalgebra::Vector3;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        DropDeformable,
    }

    struct ScriptedEngine {
        behaviour: Behaviour,
        calls: usize,
    }

    impl RegistrationEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn register(&mut self, scene: &mut Scene, request: &RegistrationRequest) -> Result<(), EngineError> {
            self.calls += 1;
            match self.behaviour {
                Behaviour::Succeed => {
                    if let Some(t) = scene.transform_mut(request.affine_output) {
                        *t = SpatialTransform::translation(Vector3::new(1.0, 0.0, 0.0));
                    }
                    let label = scene.name(request.fixed_label_map).unwrap_or_default().to_string();
                    let grid = ImageGeometry::axis_aligned([2, 2, 2], [0.0; 3], [1.0; 3]);
                    scene.add_volume(format!("{}-DistanceMap", label), Volume::new(grid));
                    Ok(())
                }
                Behaviour::Fail => Err(EngineError::execution("scripted", "did not converge")),
                Behaviour::Panic => panic!("solver blew up"),
                Behaviour::DropDeformable => {
                    scene.remove(request.deformable_output);
                    Ok(())
                }
            }
        }
    }

    fn prepared() -> (Scene, PipelineContext) {
        let grid = ImageGeometry::axis_aligned([6, 6, 6], [0.0; 3], [1.0; 3]);
        let mut scene = Scene::new();
        let study = scene.add_folder("MR study", FolderLevel::Study, None);
        let mut ctx = PipelineContext::new();
        ctx.fixed_volume = Some(scene.add_volume("US", Volume::new(grid.clone())));
        let mr = scene.add_volume("MR", Volume::new(grid.clone()));
        scene.set_folder(mr, Some(study)).unwrap();
        ctx.moving_volume = Some(mr);
        ctx.fixed_label_map = Some(scene.add_label_map(
            "Fixed_Structure_Padded",
            LabelMapVolume::from_image(LabelImage::new(grid)),
        ));
        ctx.moving_label_map = Some(scene.add_label_map(
            "Moving_Structure_Padded",
            LabelMapVolume::from_image(LabelImage::new(ImageGeometry::axis_aligned([4, 4, 4], [1.0; 3], [1.0; 3]))),
        ));
        (scene, ctx)
    }

    #[test]
    fn test_success_populates_outputs_and_cleans_up() {
        let (mut scene, mut ctx) = prepared();
        let mut engine = ScriptedEngine { behaviour: Behaviour::Succeed, calls: 0 };
        perform_distance_based_registration(&mut scene, &mut ctx, &Config::default(), &mut engine).unwrap();

        assert_eq!(engine.calls, 1);
        let affine = ctx.affine_transform.unwrap();
        assert!(!scene.transform(affine).unwrap().is_identity());
        assert!(ctx.deformable_transform.is_some());
        let report = ctx.cleanup_report.as_ref().unwrap();
        assert!(report.contains("Fixed_Structure_Padded"));
        assert!(report.contains("Fixed_Structure_Padded-DistanceMap"));
        assert!(scene.find_by_name("Moving_Structure_Padded").is_none());
    }

    #[test]
    fn test_kept_artifacts_are_filed_under_moving_study() {
        let (mut scene, mut ctx) = prepared();
        let mut config = Config::default();
        config.pipeline.keep_intermediates = true;
        let mut engine = ScriptedEngine { behaviour: Behaviour::Succeed, calls: 0 };
        perform_distance_based_registration(&mut scene, &mut ctx, &config, &mut engine).unwrap();

        let artifact = scene.find_by_name("Fixed_Structure_Padded-DistanceMap").unwrap();
        assert_eq!(scene.folder_of(artifact), scene.folder_of(ctx.moving_volume.unwrap()));
        assert!(ctx.cleanup_report.is_none());
        // Moving label map was brought onto the fixed grid before the call.
        let moving = scene.label_map(ctx.moving_label_map.unwrap()).unwrap();
        assert_eq!(moving.geometry().dims, [6, 6, 6]);
    }

    #[test]
    fn test_engine_error_discards_outputs() {
        let (mut scene, mut ctx) = prepared();
        let before = scene.len();
        let mut engine = ScriptedEngine { behaviour: Behaviour::Fail, calls: 0 };
        let err = perform_distance_based_registration(&mut scene, &mut ctx, &Config::default(), &mut engine)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Engine(EngineError::Execution { .. })));
        assert_eq!(scene.len(), before);
        assert!(ctx.affine_transform.is_none());
    }

    #[test]
    fn test_engine_panic_is_contained() {
        let (mut scene, mut ctx) = prepared();
        let mut engine = ScriptedEngine { behaviour: Behaviour::Panic, calls: 0 };
        let err = perform_distance_based_registration(&mut scene, &mut ctx, &Config::default(), &mut engine)
            .unwrap_err();
        match err {
            PipelineError::Engine(EngineError::Panicked { message, .. }) => assert_eq!(message, "solver blew up"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_output_discards_the_other() {
        let (mut scene, mut ctx) = prepared();
        let before = scene.len();
        let mut engine = ScriptedEngine { behaviour: Behaviour::DropDeformable, calls: 0 };
        let err = perform_distance_based_registration(&mut scene, &mut ctx, &Config::default(), &mut engine)
            .unwrap_err();
        assert_eq!(err.kind(), "consistency");
        assert_eq!(scene.len(), before);
        assert!(scene.find_by_name("Affine Transform").is_none());
        assert!(ctx.affine_transform.is_none());
        assert!(ctx.deformable_transform.is_none());
    }

    #[test]
    fn test_missing_label_map_never_calls_engine() {
        let (mut scene, mut ctx) = prepared();
        ctx.moving_label_map = None;
        let mut engine = ScriptedEngine { behaviour: Behaviour::Succeed, calls: 0 };
        assert!(perform_distance_based_registration(&mut scene, &mut ctx, &Config::default(), &mut engine).is_err());
        assert_eq!(engine.calls, 0);
    }
}
