//! Target registration error between paired fiducial points.

use crate::error::{PipelineError, StageResult};
use crate::model::TransformChain;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Row labels of a [`FiducialErrorTable`].
pub const FIDUCIAL_ERROR_ROWS: [&str; 4] = ["3D", "2D R-L", "2D A-P", "2D I-S"];

#[derive(Debug, Clone, PartialEq)]
pub struct Fiducial {
    pub label: String,
    pub position: Point3<f64>,
}

/// Ordered list of named points; pairs are matched by index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FiducialList {
    pub name: String,
    pub fiducials: Vec<Fiducial>,
}

impl FiducialList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fiducials: Vec::new(),
        }
    }

    pub fn with_fiducial(mut self, label: impl Into<String>, position: Point3<f64>) -> Self {
        self.fiducials.push(Fiducial {
            label: label.into(),
            position,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.fiducials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fiducials.is_empty()
    }

    /// Copy with every point mapped into world space through `chain`.
    pub fn transformed(&self, chain: &TransformChain) -> FiducialList {
        FiducialList {
            name: self.name.clone(),
            fiducials: self
                .fiducials
                .iter()
                .map(|f| Fiducial {
                    label: f.label.clone(),
                    position: chain.to_world_point(&f.position),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialErrorColumn {
    pub name: String,
    /// Values in [`FIDUCIAL_ERROR_ROWS`] order.
    pub values: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialErrorTable {
    pub columns: Vec<FiducialErrorColumn>,
}

impl FiducialErrorTable {
    pub fn column(&self, name: &str) -> Option<&FiducialErrorColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn mean_3d(&self) -> f64 {
        if self.columns.is_empty() {
            return 0.0;
        }
        self.columns.iter().map(|c| c.values[0]).sum::<f64>() / self.columns.len() as f64
    }

    /// Row headers in the first column, one column per fiducial pair.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("metric");
        for column in &self.columns {
            csv.push(',');
            csv.push_str(&column.name);
        }
        csv.push('\n');
        for (row, label) in FIDUCIAL_ERROR_ROWS.iter().enumerate() {
            csv.push_str(label);
            for column in &self.columns {
                let _ = write!(csv, ",{}", column.values[row]);
            }
            csv.push('\n');
        }
        csv
    }
}

/// Per-pair 3D distance and absolute per-axis differences.
///
/// Columns are named after the fixed fiducial labels with the first
/// `label_prefix` characters removed.
pub fn calculate_fiducial_errors(
    fixed: &FiducialList,
    moving: &FiducialList,
    label_prefix: usize,
) -> StageResult<FiducialErrorTable> {
    if fixed.len() != moving.len() {
        return Err(PipelineError::precondition(
            "fiducial lists need to contain the same number of fiducials",
        ));
    }
    if fixed.is_empty() {
        return Err(PipelineError::precondition(
            "fiducial lists need to contain at least one fiducial",
        ));
    }

    let columns = fixed
        .fiducials
        .iter()
        .zip(&moving.fiducials)
        .map(|(f, m)| {
            let d = f.position - m.position;
            FiducialErrorColumn {
                name: f.label.chars().skip(label_prefix).collect(),
                values: [d.norm(), d.x.abs(), d.y.abs(), d.z.abs()],
            }
        })
        .collect();
    Ok(FiducialErrorTable { columns })
}
