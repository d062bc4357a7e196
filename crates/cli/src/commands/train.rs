//! Offline training command

use advisor_lib::{
    observability::StructuredLogger,
    training::{load_dataset, ClassDistribution, DatasetSummary},
    AdvisorConfig, ModelTrainer, Prediction, TrainingError,
};
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use super::metrics::print_metrics;
use crate::output::{
    color_action, format_probability, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct DistributionRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Before")]
    before: usize,
    #[tabled(rename = "After")]
    after: usize,
}

#[derive(Serialize)]
struct TrainReport<'a> {
    model_version: String,
    dataset: &'a DatasetSummary,
    distribution_before: &'a ClassDistribution,
    distribution_after: &'a ClassDistribution,
    train_size: usize,
    test_size: usize,
    metrics: &'a advisor_lib::ModelMetrics,
    probe: Option<&'a Prediction>,
}

/// Train a model from a labelled CSV and persist artifact and metrics
pub fn train(
    config: &AdvisorConfig,
    dataset_path: &Path,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let logger = StructuredLogger::new("cli");
    let (examples, summary) = load_dataset(dataset_path)
        .with_context(|| format!("Failed to load dataset {}", dataset_path.display()))?;

    let seed = seed.unwrap_or(config.training.seed);
    let trainer = ModelTrainer::new(config.training.clone());
    let model = match trainer.train(&examples, seed) {
        Ok(model) => model,
        Err(e) => {
            if let TrainingError::Abort(abort) = &e {
                logger.log_training_aborted(&abort.to_string());
            }
            return Err(e).context("Training failed; no model was written");
        }
    };

    trainer.persist(&model, &config.model_path, &config.metrics_path)?;
    let version = model.artifact.version()?;
    logger.log_training_completed(&version, model.metrics.accuracy, examples.len());

    match format {
        OutputFormat::Json => print_json(&TrainReport {
            model_version: version,
            dataset: &summary,
            distribution_before: &model.distribution_before,
            distribution_after: &model.distribution_after,
            train_size: model.train_size,
            test_size: model.test_size,
            metrics: &model.metrics,
            probe: model.probe.as_ref(),
        }),
        OutputFormat::Table => {
            print_info(&format!(
                "Loaded {} examples from {}",
                summary.rows_kept,
                dataset_path.display()
            ));
            if summary.rows_skipped > 0 {
                print_warning(&format!(
                    "Skipped {} unusable rows (missing, malformed or out-of-range values)",
                    summary.rows_skipped
                ));
            }
            println!();

            let rows: Vec<DistributionRow> = model
                .distribution_after
                .0
                .iter()
                .map(|(action, &after)| DistributionRow {
                    action: action.clone(),
                    before: model.distribution_before.count(action),
                    after,
                })
                .collect();
            println!("{}", "Class Distribution".bold());
            print_table(rows, "No classes found");
            println!(
                "Train/test split: {} / {}",
                model.train_size, model.test_size
            );
            println!();

            print_metrics(&model.metrics);

            if let Some(probe) = &model.probe {
                println!();
                println!(
                    "Probe (Wheat, Clay, nutrient level 1): {}",
                    color_action(&probe.display_action())
                );
                for p in &probe.probabilities {
                    println!("  {:<12} {}", p.action, format_probability(p.probability));
                }
            }

            println!();
            print_success(&format!(
                "Model {} saved to {}",
                version.cyan(),
                config.model_path.display()
            ));
            print_info(&format!("Metrics saved to {}", config.metrics_path.display()));
            Ok(())
        }
    }
}
