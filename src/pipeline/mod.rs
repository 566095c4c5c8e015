//! The segment registration pipeline.
//!
//! Stages are free functions in [`stages`] operating on a [`Scene`](crate::model::Scene)
//! and a [`PipelineContext`]. [`Pipeline`] runs them in order with spans and
//! metrics; [`RegistrationLogic`] is the caller-facing entry point.

pub mod apply;
pub mod builder;
pub mod cleanup;
pub mod context;
pub mod stages;
pub mod types;
pub mod workflow;

pub use apply::{apply_transformation, TransformationMode};
pub use builder::*;
pub use cleanup::{remove_intermediates, CleanupReport};
pub use context::PipelineContext;
pub use types::*;
pub use workflow::RegistrationLogic;
