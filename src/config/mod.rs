use crate::engines::Interpolation;
use crate::logging::LoggingConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub cropping: CroppingConfig,
    pub resampling: ResamplingConfig,
    pub label_maps: LabelMapConfig,
    pub naming: NamingConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

/// Named parameter sets for the two supported workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPreset {
    /// Two arbitrary structures on two arbitrary images.
    #[default]
    Generic,
    /// Prostate contour propagation from MRI (moving) onto ultrasound (fixed).
    Prostate,
}

impl FromStr for WorkflowPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "prostate" => Ok(Self::Prostate),
            other => anyhow::bail!("Unknown workflow preset: {}", other),
        }
    }
}

impl fmt::Display for WorkflowPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Prostate => write!(f, "prostate"),
        }
    }
}

/// Where the exported label maps are filed in the provenance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelMapFiling {
    /// Fixed label map under the moving study and vice versa.
    #[default]
    Crossed,
    /// Each label map under its own study.
    SameStudy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preset: WorkflowPreset,
    pub keep_intermediates: bool,
    /// Clone and harden the fixed volume and both segmentations even when
    /// they carry no transform.
    pub always_harden_copies: bool,
    pub label_map_filing: LabelMapFiling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CroppingConfig {
    /// ROI radius on x and y is `in_plane_factor * x_extent / 2`.
    pub in_plane_factor: f64,
    /// ROI radius on z is `through_plane_factor * z_extent / 2`.
    pub through_plane_factor: f64,
    pub voxel_based: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingConfig {
    pub spacing: [f64; 3],
    pub interpolation: Interpolation,
    pub lanczos_radius: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelMapConfig {
    /// In-plane spacing used when rasterizing contour-only segments.
    pub rasterization_spacing: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub fixed_label_map: String,
    pub moving_label_map: String,
    pub prealignment_transform: String,
    pub affine_transform: String,
    pub deformable_transform: String,
    /// Scratch copy of the moving image left behind by the registration engine.
    pub moving_image_copy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Characters stripped from the front of each fixed fiducial label.
    pub fiducial_label_prefix: usize,
    pub hausdorff_percentile: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preset: WorkflowPreset::Generic,
            keep_intermediates: false,
            always_harden_copies: false,
            label_map_filing: LabelMapFiling::Crossed,
        }
    }
}

impl Default for CroppingConfig {
    fn default() -> Self {
        Self {
            in_plane_factor: 3.0,
            through_plane_factor: 2.0,
            voxel_based: true,
        }
    }
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            spacing: [1.0, 1.0, 1.0],
            interpolation: Interpolation::Lanczos,
            lanczos_radius: 3,
        }
    }
}

impl Default for LabelMapConfig {
    fn default() -> Self {
        Self {
            rasterization_spacing: 1.0,
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            fixed_label_map: "Fixed_Structure_Padded".to_string(),
            moving_label_map: "Moving_Structure_Padded".to_string(),
            prealignment_transform: "PreAlignmentMoving2FixedLinearTransform".to_string(),
            affine_transform: "Affine Transform".to_string(),
            deformable_transform: "Deformable Transform".to_string(),
            moving_image_copy: "MovingImageCopy".to_string(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            fiducial_label_prefix: 13,
            hausdorff_percentile: 95.0,
        }
    }
}

impl Config {
    /// Default configuration with a preset applied.
    pub fn for_preset(preset: WorkflowPreset) -> Self {
        let mut config = Self::default();
        config.apply_preset(preset);
        config
    }

    /// Overwrite the preset-dependent fields.
    pub fn apply_preset(&mut self, preset: WorkflowPreset) {
        self.pipeline.preset = preset;
        match preset {
            WorkflowPreset::Generic => {
                let naming = NamingConfig::default();
                self.pipeline.always_harden_copies = false;
                self.pipeline.label_map_filing = LabelMapFiling::Crossed;
                self.naming.fixed_label_map = naming.fixed_label_map;
                self.naming.moving_label_map = naming.moving_label_map;
                self.naming.prealignment_transform = naming.prealignment_transform;
            }
            WorkflowPreset::Prostate => {
                self.pipeline.always_harden_copies = true;
                self.pipeline.label_map_filing = LabelMapFiling::SameStudy;
                self.naming.fixed_label_map = "US_Prostate_Padded".to_string();
                self.naming.moving_label_map = "MRI_Prostate_Padded".to_string();
                self.naming.prealignment_transform = "PreAlignmentMri2UsLinearTransform".to_string();
            }
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).context("Failed to parse JSON config")
        } else {
            toml::from_str(&content).context("Failed to parse TOML config")
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !is_positive(self.cropping.in_plane_factor) {
            errors.push("Cropping in_plane_factor must be positive".to_string());
        }

        if !is_positive(self.cropping.through_plane_factor) {
            errors.push("Cropping through_plane_factor must be positive".to_string());
        }

        if !self.resampling.spacing.iter().all(|s| is_positive(*s)) {
            errors.push("Resampling spacing must be positive on every axis".to_string());
        }

        if self.resampling.lanczos_radius == 0 {
            errors.push("Lanczos radius must be at least 1".to_string());
        }

        if !is_positive(self.label_maps.rasterization_spacing) {
            errors.push("Label map rasterization_spacing must be positive".to_string());
        }

        if self.naming.fixed_label_map.is_empty() || self.naming.moving_label_map.is_empty() {
            errors.push("Label map names must not be empty".to_string());
        }

        if self.naming.fixed_label_map == self.naming.moving_label_map {
            errors.push("Fixed and moving label map names must differ".to_string());
        }

        if !(0.0..=100.0).contains(&self.evaluation.hausdorff_percentile) {
            errors.push("Hausdorff percentile must be within 0..=100".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    eprintln!("Configuration validation errors:");
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                    eprintln!("Using default configuration instead.");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                eprintln!("Failed to load config from '{}': {:#}", path, e);
                eprintln!("Using default configuration.");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
