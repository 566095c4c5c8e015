use serde::{Deserialize, Serialize};

/// Wall-clock duration of one executed stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTime {
    pub stage_name: String,
    pub duration_ms: f64,
}

/// Message a stage left for the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub level: MessageLevel,
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}
