use crate::error::EngineError;
use crate::model::{NodeId, Scene};

/// Suffixes of the scratch volumes a distance-map registration engine
/// leaves in the scene for each input label map.
pub const ENGINE_ARTIFACT_SUFFIXES: [&str; 4] = ["-Cropped", "-Smoothed", "-DistanceMap", "-surface"];

/// Names of the scratch artifacts created for a label map called `label`.
pub fn engine_artifact_names(label: &str) -> Vec<String> {
    ENGINE_ARTIFACT_SUFFIXES
        .iter()
        .map(|suffix| format!("{}{}", label, suffix))
        .collect()
}

/// Inputs and pre-allocated outputs of one registration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub fixed_volume: NodeId,
    pub fixed_label_map: NodeId,
    pub moving_volume: NodeId,
    pub moving_label_map: NodeId,
    /// Transform node receiving the affine result.
    pub affine_output: NodeId,
    /// Transform node receiving the deformable result.
    pub deformable_output: NodeId,
}

/// Distance-map based affine + deformable solver.
///
/// Implementations read the four inputs from the scene and write both
/// output transform nodes before returning. Inputs carry no parent
/// transforms when the engine is invoked.
pub trait RegistrationEngine {
    fn name(&self) -> &str;

    fn register(&mut self, scene: &mut Scene, request: &RegistrationRequest) -> Result<(), EngineError>;
}
