//! Logging configuration
//!
//! Per-component log levels and output destinations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Level for `pipeline` stages and the workflow driver
    pub pipeline_level: String,

    /// Level for the built-in crop and resampling engines
    pub engine_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for daily-rolled JSON log files (None = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<PathBuf>,

    /// File name prefix of the rolled log files
    pub log_file_prefix: String,

    /// Include file location in logs
    pub include_file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            pipeline_level: "info".to_string(),
            engine_level: "warn".to_string(),
            console_output: true,
            log_directory: None,
            log_file_prefix: "segment_registration.log".to_string(),
            include_file_location: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration writing JSON logs under `logs/`
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            pipeline_level: "trace".to_string(),
            engine_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (field, level) in [
            ("global_level", &self.global_level),
            ("pipeline_level", &self.pipeline_level),
            ("engine_level", &self.engine_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    field, level, VALID_LEVELS
                ));
            }
        }

        if self.log_directory.is_some() && self.log_file_prefix.is_empty() {
            return Err("log_file_prefix must not be empty when file logging is enabled".to_string());
        }

        Ok(())
    }

    /// Effective log level for a component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "pipeline" | "evaluation" => &self.pipeline_level,
            "engines" | "engine" => &self.engine_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for the crate's modules
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={},{krate}::pipeline={},{krate}::evaluation={},{krate}::engines={}",
            self.global_level,
            self.get_component_level("pipeline"),
            self.get_component_level("evaluation"),
            self.get_component_level("engines"),
        )
    }
}
