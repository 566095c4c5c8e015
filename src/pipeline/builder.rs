use crate::config::Config;
use crate::engines::{CropEngine, LanczosResampler, RegistrationEngine, ResamplingEngine, VoxelCropEngine};
use crate::error::StageResult;
use crate::logging::{get_correlation_id, global_metrics, new_correlation_id, PipelineSpan};
use crate::model::Scene;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stages;
use crate::pipeline::types::{MessageLevel, StageTime};
use std::collections::HashMap;
use tracing::{debug, error, info};

/// External collaborators used by the stages
pub struct Engines {
    pub crop: Box<dyn CropEngine>,
    pub resampler: Box<dyn ResamplingEngine>,
    pub registration: Box<dyn RegistrationEngine>,
}

impl Engines {
    /// Built-in crop and resampling engines around a caller-supplied solver
    pub fn new(registration: Box<dyn RegistrationEngine>, config: &Config) -> Self {
        Self {
            crop: Box::new(VoxelCropEngine::new()),
            resampler: Box::new(LanczosResampler::new(config.resampling.lanczos_radius)),
            registration,
        }
    }

    pub fn with_crop(mut self, crop: Box<dyn CropEngine>) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_resampler(mut self, resampler: Box<dyn ResamplingEngine>) -> Self {
        self.resampler = resampler;
        self
    }
}

/// Everything a stage may read or mutate
pub struct StageEnv<'a> {
    pub scene: &'a mut Scene,
    pub context: &'a mut PipelineContext,
    pub config: &'a Config,
    pub engines: &'a mut Engines,
}

/// One step of the registration pipeline
pub trait RegistrationStage {
    fn stage_name(&self) -> &str;

    /// Scene inputs recorded on the stage span
    fn inputs(&self, _env: &StageEnv<'_>) -> Vec<String> {
        Vec::new()
    }

    /// Run the stage and describe its output
    fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<String>;
}

/// Builder for registration pipelines
pub struct PipelineBuilder {
    stages: Vec<Box<dyn RegistrationStage>>,
    name: String,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stages: Vec::new(),
            name: name.into(),
        }
    }

    pub fn add_stage<S>(mut self, stage: S) -> Self
    where
        S: RegistrationStage + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            name: self.name,
        }
    }
}

/// Executable sequence of stages
pub struct Pipeline {
    stages: Vec<Box<dyn RegistrationStage>>,
    name: String,
}

impl Pipeline {
    /// Crop, pre-align, resample, label maps, registration
    pub fn registration() -> Self {
        PipelineBuilder::new("segment_registration")
            .add_stage(CropStage)
            .add_stage(PreAlignStage)
            .add_stage(ResampleStage)
            .add_stage(LabelMapStage)
            .add_stage(RegisterStage)
            .build()
    }

    /// Execute every stage in order, stopping at the first failure
    pub fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<()> {
        let correlation_id = get_correlation_id().unwrap_or_else(new_correlation_id);

        info!(
            pipeline = %self.name,
            total_stages = self.stages.len(),
            correlation_id = %correlation_id,
            "Starting pipeline execution"
        );

        for (idx, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.stage_name().to_string();
            let pipeline_span = PipelineSpan::new(&stage_name, Some(correlation_id));
            let _span_guard = pipeline_span.enter();

            let inputs = stage.inputs(env);
            let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
            pipeline_span.record_inputs(&input_refs);
            debug!(stage = %stage_name, stage_index = idx, "Executing pipeline stage");

            let result = stage.execute(env);
            let success = result.is_ok();
            let description = match &result {
                Ok(output) => output.clone(),
                Err(e) => e.to_string(),
            };
            let duration = pipeline_span.record_completion(&description, success);

            let mut metadata = HashMap::new();
            metadata.insert("success".to_string(), serde_json::json!(success));
            global_metrics().record_with_metadata(&stage_name, duration, Some(correlation_id), metadata);

            match result {
                Ok(_) => {
                    env.context.stage_timings.push(StageTime {
                        stage_name,
                        duration_ms: duration.as_secs_f64() * 1000.0,
                    });
                }
                Err(e) => {
                    error!(
                        stage = %stage_name,
                        kind = e.kind(),
                        error = %e,
                        "Pipeline stage failed"
                    );
                    env.context.push_message(MessageLevel::Error, &stage_name, e.to_string());
                    return Err(e);
                }
            }
        }

        info!(
            pipeline = %self.name,
            total_duration_ms = env.context.total_duration_ms(),
            stages_executed = self.stages.len(),
            correlation_id = %correlation_id,
            "Pipeline execution completed successfully"
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }
}

fn node_label(env: &StageEnv<'_>, id: Option<crate::model::NodeId>) -> String {
    id.and_then(|id| env.scene.name(id))
        .unwrap_or("<unset>")
        .to_string()
}

pub struct CropStage;

impl RegistrationStage for CropStage {
    fn stage_name(&self) -> &str {
        "crop_moving_volume"
    }

    fn inputs(&self, env: &StageEnv<'_>) -> Vec<String> {
        vec![
            node_label(env, env.context.moving_volume),
            node_label(env, env.context.moving_segmentation),
        ]
    }

    fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<String> {
        let id = stages::crop_moving_volume(env.scene, env.context, env.config, env.engines.crop.as_ref())?;
        Ok(node_label(env, Some(id)))
    }
}

pub struct PreAlignStage;

impl RegistrationStage for PreAlignStage {
    fn stage_name(&self) -> &str {
        "pre_align_segmentations"
    }

    fn inputs(&self, env: &StageEnv<'_>) -> Vec<String> {
        vec![
            node_label(env, env.context.fixed_segmentation),
            node_label(env, env.context.moving_segmentation),
        ]
    }

    fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<String> {
        let t = stages::pre_align_segmentations(env.scene, env.context, env.config)?;
        Ok(format!("translation ({:.3}, {:.3}, {:.3})", t.x, t.y, t.z))
    }
}

pub struct ResampleStage;

impl RegistrationStage for ResampleStage {
    fn stage_name(&self) -> &str {
        "resample_fixed_volume"
    }

    fn inputs(&self, env: &StageEnv<'_>) -> Vec<String> {
        vec![node_label(env, env.context.fixed_volume)]
    }

    fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<String> {
        let id = stages::resample_fixed_volume(env.scene, env.context, env.config, env.engines.resampler.as_ref())?;
        Ok(node_label(env, Some(id)))
    }
}

pub struct LabelMapStage;

impl RegistrationStage for LabelMapStage {
    fn stage_name(&self) -> &str {
        "create_structure_labelmaps"
    }

    fn inputs(&self, env: &StageEnv<'_>) -> Vec<String> {
        vec![
            node_label(env, env.context.fixed_segmentation),
            node_label(env, env.context.moving_segmentation),
            node_label(env, env.context.cropped_volume),
        ]
    }

    fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<String> {
        let (fixed, moving) = stages::create_structure_labelmaps(env.scene, env.context, env.config)?;
        Ok(format!("{}, {}", node_label(env, Some(fixed)), node_label(env, Some(moving))))
    }
}

pub struct RegisterStage;

impl RegistrationStage for RegisterStage {
    fn stage_name(&self) -> &str {
        "perform_distance_based_registration"
    }

    fn inputs(&self, env: &StageEnv<'_>) -> Vec<String> {
        vec![
            node_label(env, env.context.effective_fixed_volume()),
            node_label(env, env.context.fixed_label_map),
            node_label(env, env.context.moving_volume),
            node_label(env, env.context.moving_label_map),
        ]
    }

    fn execute(&self, env: &mut StageEnv<'_>) -> StageResult<String> {
        stages::perform_distance_based_registration(
            env.scene,
            env.context,
            env.config,
            env.engines.registration.as_mut(),
        )?;
        Ok(format!(
            "{}, {}",
            node_label(env, env.context.affine_transform),
            node_label(env, env.context.deformable_transform)
        ))
    }
}
