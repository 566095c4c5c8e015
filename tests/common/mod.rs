#![allow(dead_code)]

use nalgebra::{Point3, Vector3};
use segment_registration::config::Config;
use segment_registration::engines::{engine_artifact_names, RegistrationEngine, RegistrationRequest};
use segment_registration::error::EngineError;
use segment_registration::geometry::ImageGeometry;
use segment_registration::model::{
    DisplacementField, FolderId, FolderLevel, LabelImage, NodeId, PlanarContour, Scene, Segment, Segmentation,
    SpatialTransform, Volume,
};
use segment_registration::RegistrationLogic;
use std::cell::RefCell;
use std::rc::Rc;

pub const SEGMENT: &str = "prostate";

/// Volume, segmentation and study of one modality.
pub struct Phantom {
    pub volume: NodeId,
    pub segmentation: NodeId,
    pub study: FolderId,
}

/// 20^3 grid of 1 mm voxels whose first voxel centre is `origin + 0.5`,
/// with a cube structure covering world `[origin + 5, origin + 15]` on every axis.
pub fn add_cube_phantom(scene: &mut Scene, modality: &str, origin: f64) -> Phantom {
    let grid = ImageGeometry::axis_aligned([20, 20, 20], [origin + 0.5; 3], [1.0; 3]);
    let mut volume = Volume::new(grid.clone());
    let mut labels = LabelImage::new(grid);
    for ((k, j, i), value) in volume.voxels.indexed_iter_mut() {
        *value = (i + j + k) as f32;
    }
    for k in 5..15 {
        for j in 5..15 {
            for i in 5..15 {
                labels.voxels[[k, j, i]] = 1;
            }
        }
    }
    let segmentation = Segmentation::new().with_segment(Segment::from_labelmap("1", SEGMENT, labels));
    file_phantom(scene, modality, volume, segmentation)
}

/// Same layout as [`add_cube_phantom`] but the structure is given as one
/// square contour per 1 mm slice.
pub fn add_contour_phantom(scene: &mut Scene, modality: &str, origin: f64) -> Phantom {
    let grid = ImageGeometry::axis_aligned([20, 20, 20], [origin + 0.5; 3], [1.0; 3]);
    let (lo, hi) = (origin + 5.0, origin + 15.0);
    let contours = (0..10)
        .map(|s| {
            let z = lo + 0.5 + s as f64;
            PlanarContour::new(vec![
                Point3::new(lo, lo, z),
                Point3::new(hi, lo, z),
                Point3::new(hi, hi, z),
                Point3::new(lo, hi, z),
            ])
        })
        .collect();
    let segmentation = Segmentation::new().with_segment(Segment::from_contours("1", SEGMENT, contours));
    file_phantom(scene, modality, Volume::new(grid), segmentation)
}

fn file_phantom(scene: &mut Scene, modality: &str, volume: Volume, segmentation: Segmentation) -> Phantom {
    let study = scene.add_folder(format!("{} study", modality), FolderLevel::Study, None);
    let volume = scene.add_volume(modality, volume);
    let segmentation = scene.add_segmentation(format!("{} segmentation", modality), segmentation);
    scene.set_folder(volume, Some(study)).unwrap();
    scene.set_folder(segmentation, Some(study)).unwrap();
    Phantom {
        volume,
        segmentation,
        study,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

/// Registration engine that records its calls and leaves the scratch nodes
/// a distance-map engine would.
///
/// On success the affine output translates by `affine` and the deformable
/// output by `2 * affine`.
pub struct MockEngine {
    pub behaviour: Behaviour,
    pub calls: Rc<RefCell<Vec<RegistrationRequest>>>,
    pub affine: Vector3<f64>,
    pub displacement_field: bool,
}

impl MockEngine {
    pub fn new(behaviour: Behaviour) -> (Self, Rc<RefCell<Vec<RegistrationRequest>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let engine = Self {
            behaviour,
            calls: Rc::clone(&calls),
            affine: Vector3::zeros(),
            displacement_field: false,
        };
        (engine, calls)
    }

    /// Report an affine translation of `offset` and a deformable one of `2 * offset`.
    pub fn with_offset(mut self, offset: Vector3<f64>) -> Self {
        self.affine = offset;
        self
    }

    /// Write the deformable result as a uniform displacement field covering
    /// world `[-20, 30]` mm instead of a linear translation.
    pub fn with_displacement_field(mut self) -> Self {
        self.displacement_field = true;
        self
    }

    fn deformable(&self) -> SpatialTransform {
        let offset = self.affine * 2.0;
        if self.displacement_field {
            let grid = ImageGeometry::axis_aligned([50, 50, 50], [-20.0; 3], [1.0; 3]);
            // Fields map parent to child, so the structure moves by the negated displacement.
            SpatialTransform::Deformable(DisplacementField::uniform(grid, -offset))
        } else {
            SpatialTransform::translation(offset)
        }
    }
}

impl RegistrationEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn register(&mut self, scene: &mut Scene, request: &RegistrationRequest) -> Result<(), EngineError> {
        self.calls.borrow_mut().push(request.clone());
        match self.behaviour {
            Behaviour::Fail => return Err(EngineError::execution("mock", "distance maps did not converge")),
            Behaviour::Panic => panic!("mock engine crashed"),
            Behaviour::Succeed => {}
        }

        if let Some(t) = scene.transform_mut(request.affine_output) {
            *t = SpatialTransform::translation(self.affine);
        }
        let deformable = self.deformable();
        if let Some(t) = scene.transform_mut(request.deformable_output) {
            *t = deformable;
        }

        let scratch = ImageGeometry::axis_aligned([2, 2, 2], [0.0; 3], [1.0; 3]);
        for label_map in [request.fixed_label_map, request.moving_label_map] {
            let label = scene.name(label_map).unwrap_or_default().to_string();
            for name in engine_artifact_names(&label) {
                scene.add_volume(name, Volume::new(scratch.clone()));
            }
        }
        scene.add_volume("MovingImageCopy", Volume::new(scratch));
        Ok(())
    }
}

/// Fixed phantom at the origin, moving phantom 100 mm away, wired into a
/// registration logic with a mock engine.
pub fn cube_setup(
    config: Config,
    behaviour: Behaviour,
) -> (RegistrationLogic, Phantom, Phantom, Rc<RefCell<Vec<RegistrationRequest>>>) {
    let mut scene = Scene::new();
    let fixed = add_cube_phantom(&mut scene, "US", -5.0);
    let moving = add_cube_phantom(&mut scene, "MR", 95.0);
    let (engine, calls) = MockEngine::new(behaviour);
    let mut logic = RegistrationLogic::new(scene, config, Box::new(engine));
    logic.set_fixed(fixed.volume, fixed.segmentation, SEGMENT);
    logic.set_moving(moving.volume, moving.segmentation, SEGMENT);
    (logic, fixed, moving, calls)
}
