//! Prediction history review commands

use advisor_lib::{
    history::{self, HistoryFilter, HistoryStore},
    AdvisorConfig, PredictionRecord, TIMESTAMP_FORMAT,
};
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_action, print_heading, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Crop")]
    crop_type: String,
    #[tabled(rename = "Soil")]
    soil_type: String,
    #[tabled(rename = "Moisture")]
    soil_moisture: f64,
    #[tabled(rename = "Temp")]
    temperature: f64,
    #[tabled(rename = "Humidity")]
    humidity: f64,
    #[tabled(rename = "Nutrient")]
    nutrient_level: u8,
    #[tabled(rename = "pH")]
    soil_ph: f64,
    #[tabled(rename = "Action")]
    action: String,
}

impl From<&PredictionRecord> for RecordRow {
    fn from(record: &PredictionRecord) -> Self {
        let r = &record.reading;
        Self {
            timestamp: record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            crop_type: r.crop_type.to_string(),
            soil_type: r.soil_type.to_string(),
            soil_moisture: r.soil_moisture,
            temperature: r.temperature,
            humidity: r.humidity,
            nutrient_level: r.nutrient_level,
            soil_ph: r.soil_ph,
            action: color_action(&record.predicted_action),
        }
    }
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Count")]
    count: usize,
}

fn filtered(
    config: &AdvisorConfig,
    crop_type: Option<&str>,
    date: Option<&str>,
) -> Result<Vec<PredictionRecord>> {
    let filter = HistoryFilter::parse(crop_type, date)?;
    let store = HistoryStore::open(&config.history_path);
    store
        .query(&filter)
        .with_context(|| format!("Failed to read history {}", config.history_path.display()))
}

/// List recorded predictions
pub fn list(
    config: &AdvisorConfig,
    crop_type: Option<&str>,
    date: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let records = filtered(config, crop_type, date)?;

    match format {
        OutputFormat::Json => print_json(&records),
        OutputFormat::Table => {
            print_heading("Prediction History", 60);
            let total = records.len();
            let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
            print_table(rows, "No predictions match the filter");
            if total > 0 {
                println!("\nTotal: {} predictions", total);
            }
            Ok(())
        }
    }
}

/// Counts per action and the environmental trend
pub fn summary(
    config: &AdvisorConfig,
    crop_type: Option<&str>,
    date: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let records = filtered(config, crop_type, date)?;
    let summary = history::aggregate(&records);

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            print_heading("Prediction Summary", 50);
            if summary.total == 0 {
                print_warning("No predictions match the filter");
                return Ok(());
            }

            let rows: Vec<CountRow> = summary
                .counts
                .iter()
                .map(|(action, &count)| CountRow {
                    action: color_action(action),
                    count,
                })
                .collect();
            print_table(rows, "No actions recorded");

            println!();
            println!("{}", "Environmental Trend".bold());
            println!("{}", "-".repeat(50));
            println!("{:<20} {:>9} {:>7} {:>9}", "Time", "Moisture", "Temp", "Humidity");
            for point in &summary.series {
                println!(
                    "{:<20} {:>9.1} {:>7.1} {:>9.1}",
                    point.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    point.soil_moisture,
                    point.temperature,
                    point.humidity
                );
            }
            Ok(())
        }
    }
}

/// Write matching records in the history file format
pub fn export(
    config: &AdvisorConfig,
    crop_type: Option<&str>,
    date: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let records = filtered(config, crop_type, date)?;
    let bytes = history::export(&records)?;

    match output {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("Failed to write export to {}", path.display()))?;
            print_success(&format!(
                "Exported {} predictions to {}",
                records.len(),
                path.display()
            ));
        }
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&bytes)
                .context("Failed to write export to stdout")?;
        }
    }
    Ok(())
}
