//! Run state threaded through the registration stages.
//!
//! A [`PipelineContext`] names the caller's inputs, records every node a
//! stage creates and carries the resulting transforms. Stages borrow it
//! mutably; a failed run leaves whatever earlier stages recorded in place.

use crate::error::{PipelineError, StageResult};
use crate::model::NodeId;
use crate::pipeline::apply::TransformationMode;
use crate::pipeline::cleanup::CleanupReport;
use crate::pipeline::types::{MessageLevel, PipelineMessage, StageTime};
use nalgebra::Vector3;

#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub fixed_volume: Option<NodeId>,
    pub moving_volume: Option<NodeId>,
    pub fixed_segmentation: Option<NodeId>,
    pub moving_segmentation: Option<NodeId>,
    pub fixed_segment_name: Option<String>,
    pub moving_segment_name: Option<String>,

    /// Crop region, only recorded when intermediates are kept.
    pub crop_roi: Option<NodeId>,
    pub cropped_volume: Option<NodeId>,
    pub resampled_volume: Option<NodeId>,
    pub fixed_volume_hardened: Option<NodeId>,
    pub fixed_segmentation_hardened: Option<NodeId>,
    pub moving_segmentation_hardened: Option<NodeId>,
    pub fixed_label_map: Option<NodeId>,
    pub moving_label_map: Option<NodeId>,

    pub prealignment_transform: Option<NodeId>,
    pub prealignment_translation: Option<Vector3<f64>>,
    pub affine_transform: Option<NodeId>,
    pub deformable_transform: Option<NodeId>,
    pub mode: TransformationMode,

    pub stage_timings: Vec<StageTime>,
    pub messages: Vec<PipelineMessage>,
    pub cleanup_report: Option<CleanupReport>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixed(mut self, volume: NodeId, segmentation: NodeId, segment: impl Into<String>) -> Self {
        self.fixed_volume = Some(volume);
        self.fixed_segmentation = Some(segmentation);
        self.fixed_segment_name = Some(segment.into());
        self
    }

    pub fn with_moving(mut self, volume: NodeId, segmentation: NodeId, segment: impl Into<String>) -> Self {
        self.moving_volume = Some(volume);
        self.moving_segmentation = Some(segmentation);
        self.moving_segment_name = Some(segment.into());
        self
    }

    /// Segmentation the fixed label map is exported from.
    pub fn effective_fixed_segmentation(&self) -> Option<NodeId> {
        self.fixed_segmentation_hardened.or(self.fixed_segmentation)
    }

    pub fn effective_moving_segmentation(&self) -> Option<NodeId> {
        self.moving_segmentation_hardened.or(self.moving_segmentation)
    }

    /// Fixed volume handed to the registration engine.
    pub fn effective_fixed_volume(&self) -> Option<NodeId> {
        self.fixed_volume_hardened.or(self.fixed_volume)
    }

    pub fn push_message(&mut self, level: MessageLevel, stage: &str, message: impl Into<String>) {
        self.messages.push(PipelineMessage {
            level,
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &PipelineMessage> {
        self.messages.iter().filter(|m| m.level == MessageLevel::Error)
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.stage_timings.iter().map(|t| t.duration_ms).sum()
    }
}

/// Unwrap a run-state slot or report which input is missing.
pub(crate) fn required<T: Copy>(value: Option<T>, what: &str) -> StageResult<T> {
    value.ok_or_else(|| PipelineError::precondition(format!("{} is not set", what)))
}

pub(crate) fn required_name<'a>(value: &'a Option<String>, what: &str) -> StageResult<&'a str> {
    match value.as_deref() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(PipelineError::precondition(format!("{} is not set", what))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_effective_inputs_prefer_hardened_copies() {
        let original = Uuid::new_v4();
        let copy = Uuid::new_v4();
        let mut ctx = PipelineContext::new().with_fixed(original, Uuid::new_v4(), "target");
        assert_eq!(ctx.effective_fixed_volume(), Some(original));
        ctx.fixed_volume_hardened = Some(copy);
        assert_eq!(ctx.effective_fixed_volume(), Some(copy));
    }

    #[test]
    fn test_required_slots() {
        assert!(required::<NodeId>(None, "moving volume").is_err());
        assert!(required_name(&Some(String::new()), "fixed segment").is_err());
        assert_eq!(required_name(&Some("prostate".to_string()), "fixed segment").unwrap(), "prostate");
    }
}
