//! In-memory scene: node storage, provenance folders and transform hardening.
//!
//! Nodes are identified by [`NodeId`]. Every node may observe a parent
//! transform node; the chain of observed transforms defines its effective
//! world position until it is hardened.

use crate::error::{PipelineError, StageResult};
use crate::geometry::{Bounds, ImageGeometry};
use crate::model::segmentation::Segmentation;
use crate::model::transform::{SpatialTransform, TransformChain};
use crate::model::volume::{LabelImage, LabelMapVolume, Volume};
use nalgebra::{Point3, Vector3};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

pub type NodeId = Uuid;
pub type FolderId = Uuid;

/// Box-shaped region of interest in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub center: Point3<f64>,
    pub radius: Vector3<f64>,
}

impl Roi {
    pub fn new(center: Point3<f64>, radius: Vector3<f64>) -> Self {
        Self { center, radius }
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.center - self.radius, self.center + self.radius)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Volume(Volume),
    LabelMap(LabelMapVolume),
    Segmentation(Segmentation),
    Transform(SpatialTransform),
    Roi(Roi),
}

impl NodeData {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Volume(_) => "volume",
            Self::LabelMap(_) => "label_map",
            Self::Segmentation(_) => "segmentation",
            Self::Transform(_) => "transform",
            Self::Roi(_) => "roi",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub data: NodeData,
    pub parent_transform: Option<NodeId>,
    pub folder: Option<FolderId>,
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderLevel {
    Patient,
    Study,
    Folder,
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub level: FolderLevel,
    pub parent: Option<FolderId>,
}

/// Node store and provenance hierarchy.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    folders: HashMap<FolderId, Folder>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Add a node under the given name, returning its id.
    pub fn add_node(&mut self, name: impl Into<String>, data: NodeData) -> NodeId {
        let id = Uuid::new_v4();
        let node = Node {
            id,
            name: name.into(),
            data,
            parent_transform: None,
            folder: None,
            visible: true,
        };
        debug!(node_id = %id, name = %node.name, kind = node.data.type_name(), "Scene node added");
        self.nodes.insert(id, node);
        self.order.push(id);
        id
    }

    pub fn add_volume(&mut self, name: impl Into<String>, volume: Volume) -> NodeId {
        self.add_node(name, NodeData::Volume(volume))
    }

    pub fn add_segmentation(&mut self, name: impl Into<String>, segmentation: Segmentation) -> NodeId {
        self.add_node(name, NodeData::Segmentation(segmentation))
    }

    pub fn add_label_map(&mut self, name: impl Into<String>, label_map: LabelMapVolume) -> NodeId {
        self.add_node(name, NodeData::LabelMap(label_map))
    }

    pub fn add_transform(&mut self, name: impl Into<String>, transform: SpatialTransform) -> NodeId {
        self.add_node(name, NodeData::Transform(transform))
    }

    /// `base` if unused, otherwise `base_1`, `base_2`, ...
    pub fn generate_unique_name(&self, base: &str) -> String {
        if self.find_by_name(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| self.find_by_name(candidate).is_none())
            .unwrap_or_else(|| format!("{}_{}", base, Uuid::new_v4()))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn require(&self, id: NodeId) -> StageResult<&Node> {
        self.nodes.get(&id).ok_or(PipelineError::NodeNotFound(id))
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.name.as_str())
    }

    /// First node (in insertion order) with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|n| n.name == name))
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    pub fn volume(&self, id: NodeId) -> Option<&Volume> {
        match self.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::Volume(v)) => Some(v),
            _ => None,
        }
    }

    pub fn volume_mut(&mut self, id: NodeId) -> Option<&mut Volume> {
        match self.nodes.get_mut(&id).map(|n| &mut n.data) {
            Some(NodeData::Volume(v)) => Some(v),
            _ => None,
        }
    }

    pub fn segmentation(&self, id: NodeId) -> Option<&Segmentation> {
        match self.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::Segmentation(s)) => Some(s),
            _ => None,
        }
    }

    pub fn segmentation_mut(&mut self, id: NodeId) -> Option<&mut Segmentation> {
        match self.nodes.get_mut(&id).map(|n| &mut n.data) {
            Some(NodeData::Segmentation(s)) => Some(s),
            _ => None,
        }
    }

    pub fn label_map(&self, id: NodeId) -> Option<&LabelMapVolume> {
        match self.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::LabelMap(l)) => Some(l),
            _ => None,
        }
    }

    pub fn label_map_mut(&mut self, id: NodeId) -> Option<&mut LabelMapVolume> {
        match self.nodes.get_mut(&id).map(|n| &mut n.data) {
            Some(NodeData::LabelMap(l)) => Some(l),
            _ => None,
        }
    }

    pub fn transform(&self, id: NodeId) -> Option<&SpatialTransform> {
        match self.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::Transform(t)) => Some(t),
            _ => None,
        }
    }

    pub fn transform_mut(&mut self, id: NodeId) -> Option<&mut SpatialTransform> {
        match self.nodes.get_mut(&id).map(|n| &mut n.data) {
            Some(NodeData::Transform(t)) => Some(t),
            _ => None,
        }
    }

    pub fn roi(&self, id: NodeId) -> Option<&Roi> {
        match self.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::Roi(r)) => Some(r),
            _ => None,
        }
    }

    /// Remove a node. Nodes observing it as a transform lose that binding.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        self.order.retain(|n| *n != id);
        for other in self.nodes.values_mut() {
            if other.parent_transform == Some(id) {
                other.parent_transform = None;
            }
        }
        debug!(node_id = %id, name = %node.name, "Scene node removed");
        Some(node)
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) -> StageResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(PipelineError::NodeNotFound(id))?;
        node.visible = visible;
        Ok(())
    }

    // Transform bindings -------------------------------------------------

    /// Bind (or clear with `None`) the parent transform of a node.
    pub fn set_parent_transform(&mut self, id: NodeId, transform: Option<NodeId>) -> StageResult<()> {
        if let Some(t) = transform {
            if self.transform(t).is_none() {
                return Err(PipelineError::precondition(format!(
                    "node {} is not a transform node",
                    t
                )));
            }
            if t == id || self.chain_ids(t).contains(&id) {
                return Err(PipelineError::precondition("transform binding would form a cycle"));
            }
        }
        let node = self.nodes.get_mut(&id).ok_or(PipelineError::NodeNotFound(id))?;
        node.parent_transform = transform;
        Ok(())
    }

    pub fn parent_transform(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent_transform)
    }

    fn chain_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut current = self.parent_transform(id);
        while let Some(t) = current {
            if ids.contains(&t) {
                break;
            }
            ids.push(t);
            current = self.parent_transform(t);
        }
        ids
    }

    /// Transforms applied above a node, nearest first.
    pub fn transform_chain(&self, id: NodeId) -> TransformChain {
        TransformChain::new(
            self.chain_ids(id)
                .into_iter()
                .filter_map(|t| self.transform(t).cloned())
                .collect(),
        )
    }

    pub fn has_non_identity_transform(&self, id: NodeId) -> bool {
        !self.transform_chain(id).is_identity()
    }

    /// Bake the node's effective transform into its data and clear the binding.
    ///
    /// Linear chains move the grid; chains with a deformable link resample
    /// the data onto a grid enclosing the transformed extent. Hardening a
    /// node without a transform is a no-op.
    pub fn harden_transform(&mut self, id: NodeId) -> StageResult<()> {
        let chain = self.transform_chain(id);
        let node = self.nodes.get_mut(&id).ok_or(PipelineError::NodeNotFound(id))?;
        if chain.is_empty() {
            return Ok(());
        }

        match chain.as_linear() {
            Some(matrix) => match &mut node.data {
                NodeData::Volume(volume) => {
                    volume.geometry = volume.geometry.transformed(&matrix).ok_or_else(|| {
                        PipelineError::geometry("transform collapses volume grid")
                    })?;
                }
                NodeData::LabelMap(label_map) => {
                    label_map.image.geometry =
                        label_map.image.geometry.transformed(&matrix).ok_or_else(|| {
                            PipelineError::geometry("transform collapses label map grid")
                        })?;
                }
                NodeData::Segmentation(segmentation) => segmentation.apply_linear(&matrix)?,
                NodeData::Roi(roi) => roi.center = matrix.transform_point(&roi.center),
                NodeData::Transform(_) => {
                    return Err(PipelineError::precondition("cannot harden a transform node"))
                }
            },
            None => match &mut node.data {
                NodeData::Volume(volume) => {
                    let target = enclosing_grid(&volume.geometry, &chain)?;
                    *volume = volume.resample_linear(&target, |p| chain.from_world_point(p))?;
                }
                NodeData::LabelMap(label_map) => {
                    let target = enclosing_grid(&label_map.image.geometry, &chain)?;
                    label_map.image = label_map
                        .image
                        .resample_nearest(&target, |p| chain.from_world_point(p))?;
                }
                NodeData::Segmentation(segmentation) => {
                    for segment in &mut segmentation.segments {
                        if let Some(labelmap) = segment.labelmap.as_mut() {
                            *labelmap = harden_label_image(labelmap, &chain)?;
                        }
                        for contour in &mut segment.contours {
                            for p in &mut contour.points {
                                *p = chain.to_world_point(p);
                            }
                        }
                    }
                }
                NodeData::Roi(roi) => roi.center = chain.to_world_point(&roi.center),
                NodeData::Transform(_) => {
                    return Err(PipelineError::precondition("cannot harden a transform node"))
                }
            },
        }

        node.parent_transform = None;
        debug!(node_id = %id, name = %node.name, links = chain.transforms.len(), "Transform hardened");
        Ok(())
    }

    /// Deep copy of a node under a new name, keeping folder and transform binding.
    pub fn clone_node(&mut self, id: NodeId, new_name: impl Into<String>) -> StageResult<NodeId> {
        let source = self.require(id)?.clone();
        let clone_id = self.add_node(new_name, source.data);
        if let Some(node) = self.nodes.get_mut(&clone_id) {
            node.parent_transform = source.parent_transform;
            node.folder = source.folder;
        }
        Ok(clone_id)
    }

    // World-space views ------------------------------------------------

    pub fn require_volume(&self, id: NodeId) -> StageResult<&Volume> {
        let node = self.require(id)?;
        match &node.data {
            NodeData::Volume(v) => Ok(v),
            other => Err(PipelineError::precondition(format!(
                "node '{}' is a {}, expected a volume",
                node.name,
                other.type_name()
            ))),
        }
    }

    pub fn require_segmentation(&self, id: NodeId) -> StageResult<&Segmentation> {
        let node = self.require(id)?;
        match &node.data {
            NodeData::Segmentation(s) => Ok(s),
            other => Err(PipelineError::precondition(format!(
                "node '{}' is a {}, expected a segmentation",
                node.name,
                other.type_name()
            ))),
        }
    }

    pub fn require_label_map(&self, id: NodeId) -> StageResult<&LabelMapVolume> {
        let node = self.require(id)?;
        match &node.data {
            NodeData::LabelMap(l) => Ok(l),
            other => Err(PipelineError::precondition(format!(
                "node '{}' is a {}, expected a label map",
                node.name,
                other.type_name()
            ))),
        }
    }

    /// Grid of a volume or label map as placed in the world by its transforms.
    pub fn world_geometry(&self, id: NodeId) -> StageResult<ImageGeometry> {
        let node = self.require(id)?;
        let geometry = match &node.data {
            NodeData::Volume(v) => &v.geometry,
            NodeData::LabelMap(l) => &l.image.geometry,
            other => {
                return Err(PipelineError::precondition(format!(
                    "node '{}' is a {}, expected an image",
                    node.name,
                    other.type_name()
                )))
            }
        };
        let chain = self.transform_chain(id);
        if chain.is_empty() {
            return Ok(geometry.clone());
        }
        let matrix = chain.as_linear().ok_or_else(|| {
            PipelineError::precondition(format!(
                "node '{}' is under a deformable transform and must be hardened first",
                node.name
            ))
        })?;
        geometry
            .transformed(&matrix)
            .ok_or_else(|| PipelineError::geometry("transform collapses image grid"))
    }

    /// World bounds of a named segment, or of every segment when `segment` is `None`.
    ///
    /// Empty or degenerate bounds are a geometry failure.
    pub fn segment_world_bounds(&self, segmentation: NodeId, segment: Option<&str>) -> StageResult<Bounds> {
        let seg = self.require_segmentation(segmentation)?;
        let local = match segment {
            Some(name) => seg.require_segment(name)?.bounds(),
            None if seg.segments.is_empty() => {
                return Err(PipelineError::precondition("segmentation contains no segments"))
            }
            None => seg.bounds(),
        }
        .ok_or_else(|| {
            PipelineError::geometry(format!(
                "segment '{}' has empty bounds",
                segment.unwrap_or("<all>")
            ))
        })?;

        let chain = self.transform_chain(segmentation);
        let bounds = if chain.is_empty() {
            local
        } else {
            Bounds::enclosing(local.corners().iter().map(|p| chain.to_world_point(p))).unwrap_or(local)
        };
        if bounds.is_degenerate() {
            return Err(PipelineError::geometry(format!(
                "segment '{}' has degenerate bounds {}",
                segment.unwrap_or("<all>"),
                bounds
            )));
        }
        Ok(bounds)
    }

    /// Copy of a segment's binary label map placed in world coordinates.
    ///
    /// Contour-only segments are rasterized on the copy; the stored
    /// segmentation is not modified.
    pub fn segment_world_labelmap(
        &self,
        segmentation: NodeId,
        segment: &str,
        rasterization_spacing: f64,
    ) -> StageResult<LabelImage> {
        let seg = self.require_segmentation(segmentation)?;
        let found = seg.require_segment(segment)?;
        let image = match &found.labelmap {
            Some(labelmap) => labelmap.clone(),
            None => {
                let mut single = Segmentation::new().with_segment(found.clone());
                single.create_binary_labelmap_representation(rasterization_spacing);
                single
                    .segments
                    .pop()
                    .and_then(|s| s.labelmap)
                    .ok_or_else(|| PipelineError::geometry(format!("segment '{}' is empty", segment)))?
            }
        };

        let chain = self.transform_chain(segmentation);
        if chain.is_empty() {
            return Ok(image);
        }
        match chain.as_linear() {
            Some(matrix) => {
                let geometry = image
                    .geometry
                    .transformed(&matrix)
                    .ok_or_else(|| PipelineError::geometry("transform collapses segment grid"))?;
                Ok(LabelImage {
                    geometry,
                    voxels: image.voxels,
                })
            }
            None => harden_label_image(&image, &chain),
        }
    }

    // Provenance folders -------------------------------------------------

    pub fn add_folder(&mut self, name: impl Into<String>, level: FolderLevel, parent: Option<FolderId>) -> FolderId {
        let id = Uuid::new_v4();
        self.folders.insert(
            id,
            Folder {
                id,
                name: name.into(),
                level,
                parent,
            },
        );
        id
    }

    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        self.folders.get(&id)
    }

    /// Folder directly containing the node (its study, for series nodes).
    pub fn folder_of(&self, id: NodeId) -> Option<FolderId> {
        self.nodes.get(&id).and_then(|n| n.folder)
    }

    pub fn set_folder(&mut self, id: NodeId, folder: Option<FolderId>) -> StageResult<()> {
        if let Some(f) = folder {
            if !self.folders.contains_key(&f) {
                return Err(PipelineError::precondition(format!("folder {} does not exist", f)));
            }
        }
        let node = self.nodes.get_mut(&id).ok_or(PipelineError::NodeNotFound(id))?;
        node.folder = folder;
        Ok(())
    }

    /// Nodes filed directly under a folder, in insertion order.
    pub fn nodes_in_folder(&self, folder: FolderId) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.folder_of(*id) == Some(folder))
            .collect()
    }
}

fn harden_label_image(image: &LabelImage, chain: &TransformChain) -> StageResult<LabelImage> {
    let target = enclosing_grid(&image.geometry, chain)?;
    image.resample_nearest(&target, |p| chain.from_world_point(p))
}

/// Grid with the source spacing and directions that encloses the source
/// extent mapped through the chain.
fn enclosing_grid(source: &ImageGeometry, chain: &TransformChain) -> StageResult<ImageGeometry> {
    let to_index = source
        .world_to_image()
        .ok_or_else(|| PipelineError::geometry("source grid is not invertible"))?;
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for corner in source.corners_world() {
        let idx = to_index.transform_point(&chain.to_world_point(&corner));
        for axis in 0..3 {
            lo[axis] = lo[axis].min(idx[axis]);
            hi[axis] = hi[axis].max(idx[axis]);
        }
    }
    let start = Point3::new((lo[0] + 0.5).floor(), (lo[1] + 0.5).floor(), (lo[2] + 0.5).floor());
    let mut dims = [1usize; 3];
    for axis in 0..3 {
        dims[axis] = (((hi[axis] - 0.5).ceil() - start[axis]) as i64 + 1).max(1) as usize;
    }
    Ok(ImageGeometry {
        dims,
        origin: source.continuous_index_to_world(&start),
        spacing: source.spacing,
        directions: source.directions,
    })
}
