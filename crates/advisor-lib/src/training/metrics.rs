//! Held-out evaluation summary of a training run
//!
//! Precision, recall and F1 follow the usual one-vs-rest definitions with a
//! zero score whenever the denominator is empty. The confusion matrix is
//! indexed `[true][predicted]` in canonical class order.

use crate::predictor::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Scores for a single class, or an average across classes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall: f64,
    #[serde(alias = "f1-score")]
    pub f1: f64,
    pub support: u32,
}

/// Metrics persisted next to the model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub classes: Vec<String>,
    pub classification_report: BTreeMap<String, ClassReport>,
    pub macro_avg: ClassReport,
    pub weighted_avg: ClassReport,
    pub confusion_matrix: Vec<Vec<u32>>,
}

impl ModelMetrics {
    /// Score predictions against ground truth.
    ///
    /// Labels outside `classes` are ignored by the matrix but still count
    /// against accuracy.
    pub fn evaluate(classes: &[String], truth: &[String], predicted: &[String]) -> Self {
        let n = classes.len();
        let position = |label: &str| classes.iter().position(|c| c == label);

        let mut matrix = vec![vec![0u32; n]; n];
        let mut correct = 0usize;
        for (t, p) in truth.iter().zip(predicted) {
            if t == p {
                correct += 1;
            }
            if let (Some(ti), Some(pi)) = (position(t), position(p)) {
                matrix[ti][pi] += 1;
            }
        }

        let total = truth.len().min(predicted.len());
        let accuracy = ratio(correct as f64, total as f64);

        let mut report = BTreeMap::new();
        let mut per_class = Vec::with_capacity(n);
        for (i, class) in classes.iter().enumerate() {
            let tp = f64::from(matrix[i][i]);
            let predicted_as: u32 = matrix.iter().map(|row| row[i]).sum();
            let support: u32 = matrix[i].iter().sum();

            let precision = ratio(tp, f64::from(predicted_as));
            let recall = ratio(tp, f64::from(support));
            let entry = ClassReport {
                precision,
                recall,
                f1: ratio(2.0 * precision * recall, precision + recall),
                support,
            };
            per_class.push(entry.clone());
            report.insert(class.clone(), entry);
        }

        Self {
            accuracy,
            classes: classes.to_vec(),
            classification_report: report,
            macro_avg: average(&per_class, |_| 1.0),
            weighted_avg: average(&per_class, |r| f64::from(r.support)),
            confusion_matrix: matrix,
        }
    }

    pub fn class_report(&self, action: &str) -> Option<&ClassReport> {
        self.classification_report.get(action)
    }

    pub fn to_pretty_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let bytes = self.to_pretty_json().map_err(std::io::Error::other)?;
        write_atomic(path, &bytes)
    }

    /// Read persisted metrics; `Ok(None)` when none have been written
    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn average(reports: &[ClassReport], weight: impl Fn(&ClassReport) -> f64) -> ClassReport {
    let total_weight: f64 = reports.iter().map(&weight).sum();
    let mean = |field: fn(&ClassReport) -> f64| {
        ratio(
            reports.iter().map(|r| field(r) * weight(r)).sum(),
            total_weight,
        )
    };
    ClassReport {
        precision: mean(|r| r.precision),
        recall: mean(|r| r.recall),
        f1: mean(|r| r.f1),
        support: reports.iter().map(|r| r.support).sum(),
    }
}
