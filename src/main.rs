use clap::{Parser, Subcommand, ValueEnum};
use segment_registration::config::{load_config_or_default, Config, ConfigFormat, WorkflowPreset};
use segment_registration::geometry::Bounds;
use segment_registration::logging::init_logging;
use segment_registration::pipeline::stages::compute_crop_roi;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "segreg")]
#[command(about = "Segment-driven 3D image registration pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit structured tracing output as configured in the logging section
    #[arg(long, global = true)]
    trace: bool,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Toml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file for a workflow preset
    InitConfig {
        /// Workflow preset (generic or prostate)
        #[arg(short, long, default_value = "generic")]
        preset: WorkflowPreset,

        #[arg(short, long, value_enum, default_value = "toml")]
        format: FormatArg,

        /// Output path
        #[arg(short, long, default_value = "segreg.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    CheckConfig {
        path: PathBuf,
    },

    /// Crop region for a structure bounding box
    Roi {
        /// Bounds as xmin,xmax,ymin,ymax,zmin,zmax
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        bounds: Vec<f64>,
    },

    /// Pre-alignment translation between two structure bounding boxes
    Prealign {
        /// Fixed structure bounds as xmin,xmax,ymin,ymax,zmin,zmax
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        fixed: Vec<f64>,

        /// Moving structure bounds as xmin,xmax,ymin,ymax,zmin,zmax
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        moving: Vec<f64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config_or_default(cli.config.as_ref().and_then(|p| p.to_str()));

    // The tracing subscriber bridges `log` records itself.
    let _guard = if cli.trace {
        init_logging(&config.logging)?
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(match cli.verbose {
                0 => log::LevelFilter::Warn,
                1 => log::LevelFilter::Info,
                2 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            })
            .init();
        None
    };

    match cli.command {
        Commands::InitConfig { preset, format, output } => handle_init_config(preset, format, output)?,
        Commands::CheckConfig { path } => handle_check_config(path)?,
        Commands::Roi { bounds } => handle_roi(&config, &bounds)?,
        Commands::Prealign { fixed, moving } => handle_prealign(&fixed, &moving)?,
    }

    Ok(())
}

fn parse_bounds(values: &[f64], what: &str) -> anyhow::Result<Bounds> {
    let array: [f64; 6] = values
        .try_into()
        .map_err(|_| anyhow::anyhow!("{} bounds need 6 values, got {}", what, values.len()))?;
    Ok(Bounds::from_array(array))
}

fn handle_init_config(preset: WorkflowPreset, format: FormatArg, output: PathBuf) -> anyhow::Result<()> {
    let config = Config::for_preset(preset);
    let format = match format {
        FormatArg::Toml => ConfigFormat::Toml,
        FormatArg::Json => ConfigFormat::Json,
    };
    config.save_to_file(&output, format)?;
    log::info!("Wrote {} configuration to {}", preset, output.display());
    println!("Configuration written to {}", output.display());
    Ok(())
}

fn handle_check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load_from_file(&path)?;
    match config.validate() {
        Ok(()) => {
            println!("{}: valid ({} preset)", path.display(), config.pipeline.preset);
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("  - {}", error);
            }
            anyhow::bail!("{} has {} configuration error(s)", path.display(), errors.len())
        }
    }
}

fn handle_roi(config: &Config, bounds: &[f64]) -> anyhow::Result<()> {
    let bounds = parse_bounds(bounds, "structure")?;
    let roi = compute_crop_roi(&bounds, &config.cropping)?;
    let output = serde_json::json!({
        "bounds": bounds.to_array(),
        "center": [roi.center.x, roi.center.y, roi.center.z],
        "radius": [roi.radius.x, roi.radius.y, roi.radius.z],
        "roi_bounds": roi.bounds().to_array(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_prealign(fixed: &[f64], moving: &[f64]) -> anyhow::Result<()> {
    let fixed = parse_bounds(fixed, "fixed")?;
    let moving = parse_bounds(moving, "moving")?;
    for (what, bounds) in [("fixed", &fixed), ("moving", &moving)] {
        if bounds.is_degenerate() {
            anyhow::bail!("{} bounds {} are degenerate", what, bounds);
        }
    }
    let translation = fixed.centroid() - moving.centroid();
    let output = serde_json::json!({
        "fixed_centroid": [fixed.centroid().x, fixed.centroid().y, fixed.centroid().z],
        "moving_centroid": [moving.centroid().x, moving.centroid().y, moving.centroid().z],
        "translation": [translation.x, translation.y, translation.z],
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
