//! Switching the moving image between unregistered, rigid and deformable
//! placement.

use crate::error::{PipelineError, StageResult};
use crate::model::Scene;
use crate::pipeline::context::{required, PipelineContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationMode {
    /// No registration result applied.
    #[default]
    None,
    /// Bound to the affine result.
    Rigid,
    /// Bound to the deformable result.
    Deformable,
}

impl fmt::Display for TransformationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Rigid => write!(f, "rigid"),
            Self::Deformable => write!(f, "deformable"),
        }
    }
}

/// Bind the transform of `mode` to the moving volume and the moving
/// segmentation together.
///
/// All checks run before the first binding changes, so the two nodes always
/// observe the same transform.
pub fn apply_transformation(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    mode: TransformationMode,
) -> StageResult<()> {
    let volume = required(ctx.moving_volume, "moving volume")?;
    let segmentation = required(ctx.moving_segmentation, "moving segmentation")?;
    scene.require_volume(volume)?;
    scene.require_segmentation(segmentation)?;

    let transform = match mode {
        TransformationMode::None => None,
        TransformationMode::Rigid => Some(required(
            ctx.affine_transform,
            "affine transform (registration has not completed)",
        )?),
        TransformationMode::Deformable => Some(required(
            ctx.deformable_transform,
            "deformable transform (registration has not completed)",
        )?),
    };
    if let Some(t) = transform {
        if scene.transform(t).is_none() {
            return Err(PipelineError::NodeNotFound(t));
        }
    }

    scene.set_parent_transform(volume, transform)?;
    scene.set_parent_transform(segmentation, transform)?;
    ctx.mode = mode;

    info!(mode = %mode, transform = ?transform, "Transformation mode applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ImageGeometry;
    use crate::model::{Segmentation, SpatialTransform, Volume};
    use nalgebra::Vector3;

    fn registered_scene() -> (Scene, PipelineContext) {
        let mut scene = Scene::new();
        let volume = scene.add_volume(
            "MR",
            Volume::new(ImageGeometry::axis_aligned([2, 2, 2], [0.0; 3], [1.0; 3])),
        );
        let segmentation = scene.add_segmentation("MR seg", Segmentation::new());
        let mut ctx = PipelineContext::new();
        ctx.moving_volume = Some(volume);
        ctx.moving_segmentation = Some(segmentation);
        ctx.affine_transform = Some(scene.add_transform(
            "Affine Transform",
            SpatialTransform::translation(Vector3::new(1.0, 0.0, 0.0)),
        ));
        ctx.deformable_transform = Some(scene.add_transform("Deformable Transform", SpatialTransform::identity()));
        (scene, ctx)
    }

    #[test]
    fn test_modes_bind_volume_and_segmentation_together() {
        let (mut scene, mut ctx) = registered_scene();
        let volume = ctx.moving_volume.unwrap();
        let segmentation = ctx.moving_segmentation.unwrap();

        apply_transformation(&mut scene, &mut ctx, TransformationMode::Rigid).unwrap();
        assert_eq!(scene.parent_transform(volume), ctx.affine_transform);
        assert_eq!(scene.parent_transform(segmentation), ctx.affine_transform);

        apply_transformation(&mut scene, &mut ctx, TransformationMode::None).unwrap();
        assert_eq!(scene.parent_transform(volume), None);
        assert_eq!(scene.parent_transform(segmentation), None);
        assert_eq!(ctx.mode, TransformationMode::None);
    }

    #[test]
    fn test_mode_without_result_is_a_precondition_failure() {
        let (mut scene, mut ctx) = registered_scene();
        ctx.deformable_transform = None;
        let err = apply_transformation(&mut scene, &mut ctx, TransformationMode::Deformable).unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
        assert_eq!(ctx.mode, TransformationMode::None);
        assert_eq!(scene.parent_transform(ctx.moving_volume.unwrap()), None);
    }
}
