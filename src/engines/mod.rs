//! External collaborators invoked by the pipeline stages.
//!
//! Each engine sits behind a trait so that hosts can plug in their own
//! implementation. Crop and resampling ship with built-in engines; the
//! registration solver is always supplied by the caller.

pub mod crop;
pub mod registration;
pub mod resample;

pub use crop::{CropEngine, VoxelCropEngine};
pub use registration::{engine_artifact_names, RegistrationEngine, RegistrationRequest, ENGINE_ARTIFACT_SUFFIXES};
pub use resample::{Interpolation, LanczosResampler, ResampleParameters, ResamplingEngine};
