//! Named failure conditions surfaced to callers
//!
//! Every condition here is reported as its own variant so a caller can
//! render a specific message. None of them is recovered from silently.

use crate::predictor::FitError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single reading field outside its declared domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub value: String,
    pub expected: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} (expected {})", self.field, self.value, self.expected)
    }
}

/// A reading failed domain validation; lists every offending field
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("invalid reading: {}", format_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Names of the offending fields, in reading field order
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.field).collect()
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The model artifact could not be loaded
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArtifactError {
    #[error("model artifact not found at {path}")]
    NotFound { path: PathBuf },

    #[error("model artifact at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl ArtifactError {
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactError::NotFound { .. } => "ArtifactNotFound",
            ArtifactError::Corrupt { .. } => "ArtifactCorrupt",
        }
    }
}

/// Failure of a single predict call
#[derive(Debug, Clone, Error)]
pub enum PredictError {
    #[error("prediction service unavailable: {0}")]
    Unavailable(#[from] ArtifactError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Hard stop before any fit; nothing is written
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingAbort {
    #[error("training dataset is empty")]
    EmptyDataset,

    #[error("required action {action:?} has no training examples")]
    MissingClass { action: String },
}

/// Failure of a training run
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training aborted: {0}")]
    Abort(#[from] TrainingAbort),

    #[error("failed to read training dataset {path}: {source}")]
    Dataset {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("training dataset {path} is missing required column(s): {}", .missing.join(", "))]
    DatasetSchema { path: PathBuf, missing: Vec<String> },

    #[error("classifier rejected training data: {0}")]
    Fit(#[from] FitError),

    #[error("failed to persist {what} to {path}: {source}")]
    Persist {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reading or appending to the prediction history
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history schema is missing required column(s): {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("history is corrupt at line {line}: {reason}")]
    Corrupt { line: u64, reason: String },

    #[error("history I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode history rows: {0}")]
    Encode(#[from] csv::Error),
}

impl HistoryError {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryError::Schema { .. } => "SchemaError",
            HistoryError::Corrupt { .. } => "HistoryCorrupt",
            HistoryError::Io { .. } => "HistoryIo",
            HistoryError::Encode(_) => "HistoryEncode",
        }
    }
}

/// A history filter value that is neither a known value nor `all`
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {dimension} filter {value:?}: {reason}")]
pub struct FilterError {
    pub dimension: &'static str,
    pub value: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_fields() {
        let err = ValidationError {
            violations: vec![FieldViolation {
                field: "soil_pH",
                value: "15".to_string(),
                expected: "0..=14".to_string(),
            }],
        };
        assert_eq!(err.fields(), vec!["soil_pH"]);
        assert!(err.to_string().contains("soil_pH=15"));
    }

    #[test]
    fn test_schema_error_lists_missing_columns() {
        let err = HistoryError::Schema {
            missing: vec!["timestamp".to_string()],
        };
        assert_eq!(err.kind(), "SchemaError");
        assert!(err.to_string().contains("timestamp"));
    }
}
