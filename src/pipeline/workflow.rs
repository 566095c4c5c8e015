//! Caller-facing registration workflow.

use crate::config::Config;
use crate::engines::RegistrationEngine;
use crate::error::StageResult;
use crate::evaluation::{
    calculate_fiducial_errors, compare_segments, FiducialErrorTable, FiducialList, SimilarityReport,
};
use crate::logging::{new_correlation_id, RunSpan};
use crate::model::{NodeId, Scene};
use crate::pipeline::apply::{self, TransformationMode};
use crate::pipeline::builder::{Engines, Pipeline, StageEnv};
use crate::pipeline::cleanup::{remove_intermediates, CleanupReport};
use crate::pipeline::context::{required, required_name, PipelineContext};
use crate::pipeline::stages;
use nalgebra::Vector3;
use tracing::{error, info};

/// Owns the scene, the run state and the engines of one registration setup.
///
/// [`perform_registration`](Self::perform_registration) runs the whole
/// pipeline; each stage is also exposed on its own for stepwise use.
pub struct RegistrationLogic {
    pub scene: Scene,
    pub context: PipelineContext,
    pub config: Config,
    engines: Engines,
}

impl RegistrationLogic {
    pub fn new(scene: Scene, config: Config, registration: Box<dyn RegistrationEngine>) -> Self {
        let engines = Engines::new(registration, &config);
        Self::with_engines(scene, config, engines)
    }

    pub fn with_engines(scene: Scene, config: Config, engines: Engines) -> Self {
        Self {
            scene,
            context: PipelineContext::new(),
            config,
            engines,
        }
    }

    pub fn set_fixed(&mut self, volume: NodeId, segmentation: NodeId, segment: impl Into<String>) {
        self.context.fixed_volume = Some(volume);
        self.context.fixed_segmentation = Some(segmentation);
        self.context.fixed_segment_name = Some(segment.into());
    }

    pub fn set_moving(&mut self, volume: NodeId, segmentation: NodeId, segment: impl Into<String>) {
        self.context.moving_volume = Some(volume);
        self.context.moving_segmentation = Some(segmentation);
        self.context.moving_segment_name = Some(segment.into());
    }

    pub fn engines_mut(&mut self) -> &mut Engines {
        &mut self.engines
    }

    /// Run all stages and bind the deformable result.
    ///
    /// Returns `false` at the first failing stage; the run state keeps
    /// whatever the completed stages recorded.
    pub fn perform_registration(&mut self) -> bool {
        let correlation_id = new_correlation_id();
        let run = RunSpan::new(&self.config.pipeline.preset.to_string(), correlation_id);
        let _enter = run.enter();
        let completed_before = self.context.stage_timings.len();

        let pipeline = Pipeline::registration();
        let mut env = StageEnv {
            scene: &mut self.scene,
            context: &mut self.context,
            config: &self.config,
            engines: &mut self.engines,
        };
        let result = pipeline
            .execute(&mut env)
            .and_then(|()| apply::apply_transformation(&mut self.scene, &mut self.context, TransformationMode::Deformable));

        let completed = self.context.stage_timings.len() - completed_before;
        match result {
            Ok(()) => {
                run.record_completion(completed, true);
                true
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Registration run aborted");
                run.record_completion(completed, false);
                false
            }
        }
    }

    pub fn crop_moving_volume(&mut self) -> StageResult<NodeId> {
        stages::crop_moving_volume(&mut self.scene, &mut self.context, &self.config, self.engines.crop.as_ref())
    }

    pub fn pre_align_segmentations(&mut self) -> StageResult<Vector3<f64>> {
        stages::pre_align_segmentations(&mut self.scene, &mut self.context, &self.config)
    }

    pub fn resample_fixed_volume(&mut self) -> StageResult<NodeId> {
        stages::resample_fixed_volume(
            &mut self.scene,
            &mut self.context,
            &self.config,
            self.engines.resampler.as_ref(),
        )
    }

    pub fn create_structure_labelmaps(&mut self) -> StageResult<(NodeId, NodeId)> {
        stages::create_structure_labelmaps(&mut self.scene, &mut self.context, &self.config)
    }

    /// Same as [`create_structure_labelmaps`](Self::create_structure_labelmaps);
    /// contour-only segments are rasterized on the way.
    pub fn create_contour_labelmaps(&mut self) -> StageResult<(NodeId, NodeId)> {
        self.create_structure_labelmaps()
    }

    pub fn perform_distance_based_registration(&mut self) -> StageResult<()> {
        stages::perform_distance_based_registration(
            &mut self.scene,
            &mut self.context,
            &self.config,
            self.engines.registration.as_mut(),
        )
    }

    pub fn apply_transformation(&mut self, mode: TransformationMode) -> StageResult<()> {
        apply::apply_transformation(&mut self.scene, &mut self.context, mode)
    }

    /// Remove the run's intermediates unless the configuration keeps them.
    pub fn cleanup(&mut self) -> CleanupReport {
        let report = remove_intermediates(
            &mut self.scene,
            &mut self.context,
            &self.config.naming,
            self.config.pipeline.keep_intermediates,
        );
        self.context.cleanup_report = Some(report.clone());
        report
    }

    /// Dice and Hausdorff comparison of the fixed structure with the moving
    /// structure as currently placed.
    pub fn calculate_segment_similarity(&self) -> StageResult<SimilarityReport> {
        let fixed = required(self.context.fixed_segmentation, "fixed segmentation")?;
        let moving = required(self.context.moving_segmentation, "moving segmentation")?;
        let fixed_segment = required_name(&self.context.fixed_segment_name, "fixed segment name")?;
        let moving_segment = required_name(&self.context.moving_segment_name, "moving segment name")?;
        let report = compare_segments(
            &self.scene,
            (fixed, fixed_segment),
            (moving, moving_segment),
            &self.config.evaluation,
            self.config.label_maps.rasterization_spacing,
        )?;
        info!(
            dice = report.dice,
            hausdorff_max = report.hausdorff.maximum,
            mode = %self.context.mode,
            "Segment similarity calculated"
        );
        Ok(report)
    }

    /// Distances between paired fiducials; the moving list follows the
    /// transform currently applied to the moving segmentation.
    pub fn calculate_fiducial_errors(
        &self,
        fixed: &FiducialList,
        moving: &FiducialList,
    ) -> StageResult<FiducialErrorTable> {
        let placed = match self.context.moving_segmentation {
            Some(segmentation) => moving.transformed(&self.scene.transform_chain(segmentation)),
            None => moving.clone(),
        };
        calculate_fiducial_errors(fixed, &placed, self.config.evaluation.fiducial_label_prefix)
    }
}
