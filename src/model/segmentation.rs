//! Segmentations: named structure segments and their representations.
//!
//! A segment may arrive as planar contours (as RT structure sets do) or as a
//! binary label map. The registration pipeline needs the label-map form,
//! which [`Segmentation::create_binary_labelmap_representation`] materializes.

use crate::error::{PipelineError, StageResult};
use crate::geometry::{Bounds, ImageGeometry};
use crate::model::volume::LabelImage;
use nalgebra::{Matrix4, Point3};
use ndarray::Array3;

/// Closed polygon lying in an axial plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarContour {
    pub points: Vec<Point3<f64>>,
}

impl PlanarContour {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    /// Mean z of the polygon's vertices.
    pub fn plane_z(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.z).sum::<f64>() / self.points.len() as f64
    }

    /// Even-odd test in the xy-plane.
    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (pi, pj) = (&self.points[i], &self.points[j]);
            if (pi.y > y) != (pj.y > y) {
                let x_cross = (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x;
                if x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub labelmap: Option<LabelImage>,
    pub contours: Vec<PlanarContour>,
}

impl Segment {
    pub fn from_labelmap(id: impl Into<String>, name: impl Into<String>, labelmap: LabelImage) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labelmap: Some(labelmap),
            contours: Vec::new(),
        }
    }

    pub fn from_contours(
        id: impl Into<String>,
        name: impl Into<String>,
        contours: Vec<PlanarContour>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labelmap: None,
            contours,
        }
    }

    /// World bounds of the segment, from the label map when present.
    pub fn bounds(&self) -> Option<Bounds> {
        match &self.labelmap {
            Some(labelmap) => labelmap.bounds(),
            None => Bounds::enclosing(self.contours.iter().flat_map(|c| c.points.iter().copied())),
        }
    }

    pub fn has_labelmap(&self) -> bool {
        self.labelmap.is_some()
    }

    /// Move every representation by a linear to-parent matrix.
    pub(crate) fn apply_linear(&mut self, to_parent: &Matrix4<f64>) -> StageResult<()> {
        if let Some(labelmap) = self.labelmap.as_mut() {
            labelmap.geometry = labelmap
                .geometry
                .transformed(to_parent)
                .ok_or_else(|| PipelineError::geometry("transform collapses segment grid"))?;
        }
        for contour in &mut self.contours {
            for p in &mut contour.points {
                *p = to_parent.transform_point(p);
            }
        }
        Ok(())
    }

    fn rasterize(&self, in_plane_spacing: f64) -> Option<LabelImage> {
        let bounds = self.bounds()?;
        let mut planes: Vec<f64> = self.contours.iter().map(PlanarContour::plane_z).collect();
        planes.sort_by(|a, b| a.total_cmp(b));
        planes.dedup_by(|a, b| (*a - *b).abs() < 1e-6);

        let slice_spacing = planes
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(f64::INFINITY, f64::min);
        let slice_spacing = if slice_spacing.is_finite() { slice_spacing } else { in_plane_spacing };

        let extent = bounds.extent();
        let dims = [
            ((extent.x / in_plane_spacing).ceil() as usize).max(1),
            ((extent.y / in_plane_spacing).ceil() as usize).max(1),
            planes.len().max(1),
        ];
        let origin = [
            bounds.min.x + in_plane_spacing / 2.0,
            bounds.min.y + in_plane_spacing / 2.0,
            planes.first().copied().unwrap_or(bounds.min.z),
        ];
        let geometry = ImageGeometry::axis_aligned(
            dims,
            origin,
            [in_plane_spacing, in_plane_spacing, slice_spacing],
        );

        let mut voxels = Array3::<u8>::zeros(geometry.shape());
        for (k, z) in planes.iter().enumerate() {
            let on_plane: Vec<&PlanarContour> = self
                .contours
                .iter()
                .filter(|c| (c.plane_z() - z).abs() < slice_spacing / 2.0)
                .collect();
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = geometry.index_to_world(i, j, k);
                    // XOR across contours so nested contours cut holes.
                    let inside = on_plane
                        .iter()
                        .fold(false, |acc, c| acc ^ c.contains_xy(p.x, p.y));
                    if inside {
                        voxels[[k, j, i]] = 1;
                    }
                }
            }
        }
        Some(LabelImage { geometry, voxels })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
}

impl Segmentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn number_of_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn segment_by_id(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// Named segment lookup that distinguishes an empty segmentation from a
    /// missing name.
    pub fn require_segment(&self, name: &str) -> StageResult<&Segment> {
        if self.segments.is_empty() {
            return Err(PipelineError::precondition("segmentation contains no segments"));
        }
        self.segment_by_name(name)
            .ok_or_else(|| PipelineError::precondition(format!("segment '{}' not found", name)))
    }

    /// Union of all segment bounds.
    pub fn bounds(&self) -> Option<Bounds> {
        self.segments
            .iter()
            .filter_map(Segment::bounds)
            .reduce(|a, b| a.union(&b))
    }

    /// Rasterize contour-only segments into binary label maps.
    ///
    /// Returns the number of segments converted. Segments that already have a
    /// label map are left untouched.
    pub fn create_binary_labelmap_representation(&mut self, in_plane_spacing: f64) -> usize {
        let mut converted = 0;
        for segment in &mut self.segments {
            if segment.labelmap.is_some() {
                continue;
            }
            if let Some(labelmap) = segment.rasterize(in_plane_spacing) {
                segment.labelmap = Some(labelmap);
                converted += 1;
            }
        }
        converted
    }

    pub(crate) fn apply_linear(&mut self, to_parent: &Matrix4<f64>) -> StageResult<()> {
        for segment in &mut self.segments {
            segment.apply_linear(to_parent)?;
        }
        Ok(())
    }
}
