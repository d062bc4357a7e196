//! Labelled training dataset loader
//!
//! Reads the labelled CSV by header name. Rows that cannot be trusted
//! (missing fields, unparsable values, readings out of domain) are skipped
//! and counted; the count is logged and returned, never dropped silently.

use crate::error::TrainingError;
use crate::models::{SensorReading, TrainingExample, READING_COLUMNS};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Column holding the ground-truth label
pub const LABEL_COLUMN: &str = "action";

/// What the loader kept and what it dropped
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_skipped: usize,
}

/// Load labelled examples from a CSV file
pub fn load_dataset(path: &Path) -> Result<(Vec<TrainingExample>, DatasetSummary), TrainingError> {
    let dataset_err = |source: csv::Error| TrainingError::Dataset {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(dataset_err)?;

    let headers = reader.headers().map_err(dataset_err)?.clone();
    let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();

    let missing: Vec<String> = READING_COLUMNS
        .iter()
        .chain(std::iter::once(&LABEL_COLUMN))
        .filter(|c| !index.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TrainingError::DatasetSchema {
            path: path.to_path_buf(),
            missing,
        });
    }

    let mut examples = Vec::new();
    let mut summary = DatasetSummary::default();

    for (row, result) in reader.records().enumerate() {
        summary.rows_read += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                summary.rows_skipped += 1;
                debug!(row = row + 1, error = %e, "Skipping malformed dataset line");
                continue;
            }
        };

        if record.len() != headers.len() {
            summary.rows_skipped += 1;
            debug!(
                row = row + 1,
                fields = record.len(),
                expected = headers.len(),
                "Skipping dataset line with wrong field count"
            );
            continue;
        }

        let field = |name: &str| index.get(name).and_then(|&i| record.get(i));
        match parse_example(field) {
            Ok(example) => examples.push(example),
            Err(reason) => {
                summary.rows_skipped += 1;
                debug!(row = row + 1, reason = %reason, "Skipping dataset row");
            }
        }
    }

    summary.rows_kept = examples.len();
    if summary.rows_skipped > 0 {
        warn!(
            path = %path.display(),
            skipped = summary.rows_skipped,
            kept = summary.rows_kept,
            "Dropped unusable dataset rows"
        );
    }
    info!(path = %path.display(), examples = summary.rows_kept, "Training dataset loaded");

    Ok((examples, summary))
}

fn parse_example<'a>(field: impl Fn(&str) -> Option<&'a str>) -> Result<TrainingExample, String> {
    let reading = SensorReading::from_fields(&field)?;
    reading.validate().map_err(|e| e.to_string())?;

    let action = field(LABEL_COLUMN)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| format!("missing value for {}", LABEL_COLUMN))?;

    Ok(TrainingExample {
        reading,
        action: action.to_string(),
    })
}
