//! Crop advisor CLI
//!
//! Trains the action classifier offline, asks it for single-reading
//! recommendations, and reviews the recorded prediction history.

mod commands;
mod config;
mod output;

use advisor_lib::{CropType, SensorReading, SoilType};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{history, metrics, predict, train};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Crop advisor CLI
#[derive(Parser)]
#[command(name = "crop-advisor")]
#[command(
    author,
    version,
    about = "Agronomic action recommendations from soil and crop readings",
    long_about = None
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/crop-advisor/config.toml when present)
    #[arg(long, global = true, env = "ADVISOR_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Model artifact path
    #[arg(long, global = true)]
    pub model_path: Option<PathBuf>,

    /// Training metrics path
    #[arg(long, global = true)]
    pub metrics_path: Option<PathBuf>,

    /// Prediction history path
    #[arg(long, global = true)]
    pub history_path: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model from a labelled dataset
    Train {
        /// Labelled CSV with reading columns plus `action`
        #[arg(long)]
        dataset: PathBuf,

        /// Seed for balancing, splitting and the forest (overrides config)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Recommend an action for one reading
    Predict {
        #[command(flatten)]
        reading: ReadingArgs,

        /// Do not append the prediction to the history
        #[arg(long)]
        no_record: bool,
    },

    /// Review recorded predictions
    #[command(subcommand)]
    History(HistoryCommands),

    /// Show metrics from the last training run
    Metrics,
}

#[derive(Args)]
pub struct ReadingArgs {
    /// Crop type (Wheat, Rice, Corn, Soybean, Sugarcane)
    #[arg(long)]
    pub crop_type: CropType,

    /// Soil type (Clay, Sandy, Loamy, Silty, Peaty, Chalky)
    #[arg(long)]
    pub soil_type: SoilType,

    /// Soil moisture percentage, 0-100
    #[arg(long)]
    pub soil_moisture: f64,

    /// Temperature in degrees Celsius, 10-45
    #[arg(long)]
    pub temperature: f64,

    /// Relative humidity percentage, 0-100
    #[arg(long)]
    pub humidity: f64,

    /// Nutrient level, 1-5
    #[arg(long)]
    pub nutrient_level: u8,

    /// Soil pH, 0-14
    #[arg(long = "soil-ph")]
    pub soil_ph: f64,
}

impl From<ReadingArgs> for SensorReading {
    fn from(args: ReadingArgs) -> Self {
        Self {
            crop_type: args.crop_type,
            soil_type: args.soil_type,
            soil_moisture: args.soil_moisture,
            temperature: args.temperature,
            humidity: args.humidity,
            nutrient_level: args.nutrient_level,
            soil_ph: args.soil_ph,
        }
    }
}

#[derive(Args)]
pub struct FilterArgs {
    /// Crop type to keep, or `all`
    #[arg(long, default_value = "all")]
    pub crop_type: String,

    /// Calendar date (YYYY-MM-DD) to keep, or `all`
    #[arg(long, default_value = "all")]
    pub date: String,
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List recorded predictions
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Count actions and show the environmental trend
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Export records in the history file format
    Export {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output file (stdout if not given)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let overrides = config::PathOverrides {
        model_path: cli.model_path,
        metrics_path: cli.metrics_path,
        history_path: cli.history_path,
    };
    let config = config::load(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Train { dataset, seed } => {
            train::train(&config, &dataset, seed, cli.format)?;
        }
        Commands::Predict { reading, no_record } => {
            predict::predict(&config, reading.into(), !no_record, cli.format)?;
        }
        Commands::History(history_cmd) => match history_cmd {
            HistoryCommands::List { filter } => {
                history::list(
                    &config,
                    Some(filter.crop_type.as_str()),
                    Some(filter.date.as_str()),
                    cli.format,
                )?;
            }
            HistoryCommands::Summary { filter } => {
                history::summary(
                    &config,
                    Some(filter.crop_type.as_str()),
                    Some(filter.date.as_str()),
                    cli.format,
                )?;
            }
            HistoryCommands::Export { filter, output } => {
                history::export(
                    &config,
                    Some(filter.crop_type.as_str()),
                    Some(filter.date.as_str()),
                    output.as_deref(),
                )?;
            }
        },
        Commands::Metrics => {
            metrics::show_metrics(&config, cli.format)?;
        }
    }

    Ok(())
}
