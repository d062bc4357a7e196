//! ML recommendation engine

mod artifact;
mod features;
mod forest;
mod inference;
mod output;

pub use artifact::{ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub(crate) use artifact::write_atomic;
pub use features::{encode, FeatureEncoder, Vocabulary, NUM_NUMERIC_FEATURES};
pub use forest::{DecisionTree, ForestConfig, RandomForest};
pub use inference::{InferenceStats, PredictionService};
pub use output::{OutputFormatter, LOW_CONFIDENCE_THRESHOLD};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected classifier training input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("no training rows")]
    Empty,

    #[error("{features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("row {row} has {found} features, expected {expected}")]
    RaggedFeatures {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("ensemble configured with zero trees")]
    NoTrees,
}

/// Trait for action classifiers
///
/// The class list is fixed by `fit` and indexes every probability vector
/// returned afterwards.
pub trait Classifier {
    /// Train on encoded features and their labels
    fn fit(&mut self, features: &[Vec<f64>], labels: &[String]) -> Result<(), FitError>;

    /// Canonical class order
    fn classes(&self) -> &[String];

    /// Class probabilities indexed like `classes()`; sums to 1 once fitted
    fn predict_proba(&self, features: &[f64]) -> Vec<f64>;

    /// Most probable class; ties go to the earliest class in canonical order
    fn predict(&self, features: &[f64]) -> Option<&str> {
        let proba = self.predict_proba(features);
        argmax(&proba).and_then(|i| self.classes().get(i).map(String::as_str))
    }
}

/// Index of the largest value, first one wins on ties
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map(|(_, b)| v > b).unwrap_or(true) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Persistable classifier state, one variant per implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierState {
    RandomForest(RandomForest),
}

impl Classifier for ClassifierState {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[String]) -> Result<(), FitError> {
        match self {
            ClassifierState::RandomForest(forest) => forest.fit(features, labels),
        }
    }

    fn classes(&self) -> &[String] {
        match self {
            ClassifierState::RandomForest(forest) => forest.classes(),
        }
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        match self {
            ClassifierState::RandomForest(forest) => forest.predict_proba(features),
        }
    }
}
