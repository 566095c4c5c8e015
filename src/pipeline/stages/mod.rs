//! The five registration stages as free functions over the scene and the
//! run state.
//!
//! Each stage checks its inputs, does its work, records what it created in
//! the [`PipelineContext`](crate::pipeline::PipelineContext) and returns a
//! [`StageResult`](crate::error::StageResult).

pub mod crop;
pub mod labelmap;
pub mod prealign;
pub mod register;
pub mod resample;

pub use crop::{compute_crop_roi, crop_moving_volume};
pub use labelmap::create_structure_labelmaps;
pub use prealign::pre_align_segmentations;
pub use register::perform_distance_based_registration;
pub use resample::resample_fixed_volume;

use crate::error::StageResult;
use crate::model::{NodeId, Scene};

/// Clone `source` next to itself and bake its transform chain into the clone.
pub(crate) fn hardened_copy(scene: &mut Scene, source: NodeId) -> StageResult<NodeId> {
    let base = format!("{}_HardenedCopy", scene.require(source)?.name);
    let name = scene.generate_unique_name(&base);
    let copy = scene.clone_node(source, name)?;
    if let Err(e) = scene.harden_transform(copy) {
        scene.remove(copy);
        return Err(e);
    }
    Ok(copy)
}

/// Store a newly created intermediate, removing the one a previous
/// invocation of the same stage left in the slot.
pub(crate) fn record_intermediate(scene: &mut Scene, slot: &mut Option<NodeId>, id: NodeId) {
    if let Some(previous) = slot.replace(id) {
        if previous != id {
            scene.remove(previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ImageGeometry;
    use crate::model::{SpatialTransform, Volume};
    use nalgebra::Vector3;

    #[test]
    fn test_hardened_copy_leaves_source_bound() {
        let mut scene = Scene::new();
        let source = scene.add_volume(
            "US",
            Volume::new(ImageGeometry::axis_aligned([2, 2, 2], [0.0; 3], [1.0; 3])),
        );
        let t = scene.add_transform("T", SpatialTransform::translation(Vector3::new(3.0, 0.0, 0.0)));
        scene.set_parent_transform(source, Some(t)).unwrap();

        let copy = hardened_copy(&mut scene, source).unwrap();
        assert_eq!(scene.name(copy), Some("US_HardenedCopy"));
        assert!(scene.parent_transform(copy).is_none());
        assert_eq!(scene.parent_transform(source), Some(t));
        assert_eq!(scene.volume(copy).unwrap().geometry.origin.x, 3.0);
    }

    #[test]
    fn test_rerun_replaces_previous_intermediate() {
        let mut scene = Scene::new();
        let geometry = ImageGeometry::axis_aligned([2, 2, 2], [0.0; 3], [1.0; 3]);
        let first = scene.add_volume("MR_Cropped", Volume::new(geometry.clone()));
        let second = scene.add_volume("MR_Cropped_1", Volume::new(geometry));
        let mut slot = None;
        record_intermediate(&mut scene, &mut slot, first);
        record_intermediate(&mut scene, &mut slot, second);
        assert_eq!(slot, Some(second));
        assert!(!scene.contains(first));
    }
}
