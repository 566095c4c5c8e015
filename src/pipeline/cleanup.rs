//! Removal of the nodes a registration run leaves behind.

use crate::config::NamingConfig;
use crate::engines::engine_artifact_names;
use crate::model::Scene;
use crate::pipeline::context::PipelineContext;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Names of the nodes removed by one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.removed.iter().any(|n| n == name)
    }
}

/// Remove every intermediate recorded in the run state, then the scratch
/// nodes the registration engine created by naming convention.
///
/// Recorded ids are taken out of the context as they are removed, so a
/// second pass removes nothing. With `keep` set the scene is left untouched.
pub fn remove_intermediates(
    scene: &mut Scene,
    ctx: &mut PipelineContext,
    naming: &NamingConfig,
    keep: bool,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    if keep {
        info!("Keeping intermediate nodes");
        return report;
    }

    // Engine artifacts are named after the label maps, so resolve those first.
    let fixed_label = ctx
        .fixed_label_map
        .and_then(|id| scene.name(id))
        .unwrap_or(naming.fixed_label_map.as_str())
        .to_string();
    let moving_label = ctx
        .moving_label_map
        .and_then(|id| scene.name(id))
        .unwrap_or(naming.moving_label_map.as_str())
        .to_string();

    let recorded = [
        ctx.crop_roi.take(),
        ctx.cropped_volume.take(),
        ctx.resampled_volume.take(),
        ctx.fixed_volume_hardened.take(),
        ctx.fixed_segmentation_hardened.take(),
        ctx.moving_segmentation_hardened.take(),
        ctx.fixed_label_map.take(),
        ctx.moving_label_map.take(),
    ];
    for id in recorded.into_iter().flatten() {
        if let Some(node) = scene.remove(id) {
            report.removed.push(node.name);
        }
    }

    let conventional = engine_artifact_names(&fixed_label)
        .into_iter()
        .chain(engine_artifact_names(&moving_label))
        .chain(std::iter::once(naming.moving_image_copy.clone()));
    for name in conventional {
        match scene.find_by_name(&name) {
            Some(id) => {
                scene.remove(id);
                report.removed.push(name);
            }
            None => debug!(name = %name, "Engine artifact not present"),
        }
    }

    info!(removed = report.removed.len(), "Intermediate nodes removed");
    report
}
