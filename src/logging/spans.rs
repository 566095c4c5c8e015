//! Structured spans for hierarchical logging
//!
//! A [`RunSpan`] covers one registration run; each stage executed inside it
//! gets a [`PipelineSpan`]. Both carry the run's correlation id.

use std::time::{Duration, Instant};
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span for a single pipeline stage
pub struct PipelineSpan {
    span: Span,
    start_time: Instant,
    stage_name: String,
}

impl PipelineSpan {
    pub fn new(stage_name: &str, correlation_id: Option<Uuid>) -> Self {
        let span = if let Some(corr_id) = correlation_id {
            span!(
                Level::INFO,
                "pipeline_stage",
                stage = stage_name,
                correlation_id = %corr_id,
                inputs = field::Empty,
                output = field::Empty,
                success = field::Empty,
                execution_time_ms = field::Empty
            )
        } else {
            span!(
                Level::INFO,
                "pipeline_stage",
                stage = stage_name,
                inputs = field::Empty,
                output = field::Empty,
                success = field::Empty,
                execution_time_ms = field::Empty
            )
        };

        Self {
            span,
            start_time: Instant::now(),
            stage_name: stage_name.to_string(),
        }
    }

    /// Record the scene nodes a stage reads
    pub fn record_inputs(&self, inputs: &[&str]) {
        let joined = inputs.join(", ");
        self.span.record("inputs", joined.as_str());
        tracing::debug!(
            parent: &self.span,
            stage = %self.stage_name,
            inputs = %joined,
            "Pipeline stage inputs recorded"
        );
    }

    /// Record stage completion and return the elapsed time
    pub fn record_completion(&self, output: &str, success: bool) -> Duration {
        let duration = self.start_time.elapsed();
        self.span.record("output", output);
        self.span.record("success", success);
        self.span.record("execution_time_ms", duration.as_secs_f64() * 1000.0);

        if success {
            tracing::info!(
                parent: &self.span,
                output = output,
                execution_time_ms = duration.as_millis() as u64,
                "Pipeline stage completed"
            );
        } else {
            tracing::error!(
                parent: &self.span,
                error = output,
                execution_time_ms = duration.as_millis() as u64,
                "Pipeline stage failed"
            );
        }
        duration
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for one end-to-end registration run
pub struct RunSpan {
    span: Span,
    start_time: Instant,
    correlation_id: Uuid,
}

impl RunSpan {
    pub fn new(workflow: &str, correlation_id: Uuid) -> Self {
        let span = span!(
            Level::INFO,
            "registration_run",
            workflow = workflow,
            correlation_id = %correlation_id,
            stages_completed = field::Empty,
            success = field::Empty
        );
        Self {
            span,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    pub fn record_completion(&self, stages_completed: usize, success: bool) {
        let duration = self.start_time.elapsed();
        self.span.record("stages_completed", stages_completed);
        self.span.record("success", success);
        tracing::info!(
            parent: &self.span,
            stages_completed = stages_completed,
            success = success,
            total_duration_ms = duration.as_millis() as u64,
            "Registration run finished"
        );
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_pipeline_span() {
        let correlation_id = Uuid::new_v4();
        let span = PipelineSpan::new("crop_moving_volume", Some(correlation_id));

        let _enter = span.enter();
        span.record_inputs(&["MR", "MR segmentation"]);
        span.record_completion("MR_Cropped", true);
        assert!(logs_contain("Pipeline stage completed"));
    }

    #[traced_test]
    #[test]
    fn test_failed_stage_logs_error() {
        let span = PipelineSpan::new("pre_align_segmentations", None);
        span.record_completion("segment 'target' not found", false);
        assert!(logs_contain("Pipeline stage failed"));
    }

    #[traced_test]
    #[test]
    fn test_run_span() {
        let id = Uuid::new_v4();
        let run = RunSpan::new("generic", id);
        let _enter = run.enter();
        run.record_completion(5, true);
        assert_eq!(run.correlation_id(), id);
        assert!(logs_contain("Registration run finished"));
    }
}
