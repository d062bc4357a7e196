//! Single-reading prediction command

use advisor_lib::{
    history::HistoryStore, observability::StructuredLogger, AdvisorConfig, PredictError,
    Prediction, PredictionRecord, PredictionService, SensorReading,
};
use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    color_action, color_probability, print_heading, print_info, print_json, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ProbabilityRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Probability")]
    probability: String,
}

#[derive(Serialize)]
struct PredictReport<'a> {
    #[serde(flatten)]
    prediction: &'a Prediction,
    display_action: String,
    low_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a PredictionRecord>,
}

/// Predict an action for one reading and, unless told not to, record it
pub fn predict(
    config: &AdvisorConfig,
    reading: SensorReading,
    record: bool,
    format: OutputFormat,
) -> Result<()> {
    let logger = StructuredLogger::new("cli");
    let service = PredictionService::load(&config.model_path);

    let prediction = match service.predict(&reading) {
        Ok(prediction) => prediction,
        Err(PredictError::Validation(e)) => {
            logger.log_rejection(&e.fields());
            let details: Vec<String> = e.violations.iter().map(|v| v.to_string()).collect();
            return Err(anyhow!("Invalid reading: {}", details.join("; ")));
        }
        Err(e @ PredictError::Unavailable(_)) => {
            return Err(e).context("Run `crop-advisor train` to produce a model");
        }
    };
    let low_confidence = service.is_low_confidence(&prediction);
    let confidence = prediction.probability_of(&prediction.action).unwrap_or(0.0);
    logger.log_prediction(&reading, &prediction, confidence);

    let stored = if record {
        let history = HistoryStore::open(&config.history_path);
        let entry = PredictionRecord::now(reading, prediction.action.clone());
        history.append(&entry).with_context(|| {
            format!(
                "Prediction made but not recorded in {}",
                config.history_path.display()
            )
        })?;
        logger.log_history_append(&entry.predicted_action, None);
        Some(entry)
    } else {
        None
    };

    match format {
        OutputFormat::Json => print_json(&PredictReport {
            prediction: &prediction,
            display_action: prediction.display_action(),
            low_confidence,
            record: stored.as_ref(),
        }),
        OutputFormat::Table => {
            print_heading("Recommended Action", 40);
            println!("{}", color_action(&prediction.display_action()).bold());
            println!();

            let rows: Vec<ProbabilityRow> = prediction
                .probabilities
                .iter()
                .map(|p| ProbabilityRow {
                    action: p.action.clone(),
                    probability: color_probability(p.probability),
                })
                .collect();
            print_table(rows, "Model returned no probabilities");
            println!("Model version: {}", prediction.model_version.cyan());

            if low_confidence {
                print_warning("Low confidence: no action is clearly preferred");
            }
            match &stored {
                Some(entry) => print_info(&format!(
                    "Recorded at {} in {}",
                    entry.timestamp,
                    config.history_path.display()
                )),
                None => print_info("Not recorded (--no-record)"),
            }
            Ok(())
        }
    }
}
