//! Data model: volumes, segmentations, spatial transforms and the scene that owns them.

pub mod scene;
pub mod segmentation;
pub mod transform;
pub mod volume;

pub use scene::{Folder, FolderId, FolderLevel, Node, NodeData, NodeId, Roi, Scene};
pub use segmentation::{PlanarContour, Segment, Segmentation};
pub use transform::{DisplacementField, SpatialTransform, TransformChain, TransformKind};
pub use volume::{LabelDisplay, LabelImage, LabelMapVolume, OrientedImage, Volume};
