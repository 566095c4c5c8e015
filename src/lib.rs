//! Segment-driven 3D image registration.
//!
//! A fixed and a moving image, each with a segmented structure, are brought
//! into alignment in five stages: the moving volume is cropped around its
//! structure, both structures are pre-aligned by their centroids, the fixed
//! volume is resampled to isotropic spacing, both structures are exported
//! as co-registered label maps, and a distance-map registration engine
//! computes affine and deformable transforms. The result can then be
//! switched between no, rigid and deformable placement.
//!
//! [`pipeline::RegistrationLogic`] is the entry point; [`model::Scene`]
//! holds the data it operates on.

pub mod config;
pub mod engines;
pub mod error;
pub mod evaluation;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod pipeline;

pub use config::{Config, WorkflowPreset};
pub use error::{EngineError, PipelineError, StageResult};
pub use pipeline::{PipelineContext, RegistrationLogic, TransformationMode};

pub type Result<T> = anyhow::Result<T>;
