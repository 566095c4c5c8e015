//! Error types for the registration pipeline.
//!
//! Stages report failures through [`PipelineError`]; external collaborators
//! (crop, resampling and registration engines) report through [`EngineError`].

use crate::model::NodeId;
use thiserror::Error;

/// Failure reported by a pipeline stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A required input (volume, segmentation, named segment, transform) is missing.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Empty or degenerate bounds, or an unusable grid.
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// An external engine reported failure.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Paired artifacts are not both present.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A node id recorded in the run state no longer exists in the scene.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
}

/// Result type for pipeline stages.
pub type StageResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    /// Short category label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "precondition",
            Self::Geometry(_) => "geometry",
            Self::Engine(_) => "engine",
            Self::Consistency(_) => "consistency",
            Self::NodeNotFound(_) => "node_not_found",
        }
    }
}

/// Failure reported by an external engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{engine}: invalid input: {message}")]
    InvalidInput { engine: String, message: String },

    #[error("{engine}: execution failed: {message}")]
    Execution { engine: String, message: String },

    #[error("{engine}: panicked: {message}")]
    Panicked { engine: String, message: String },
}

impl EngineError {
    pub fn invalid_input(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            engine: engine.into(),
            message: message.into(),
        }
    }

    pub fn execution(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            engine: engine.into(),
            message: message.into(),
        }
    }
}
