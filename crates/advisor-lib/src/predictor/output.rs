//! Prediction output formatting
//!
//! Turns a class list and its probability vector into a `Prediction`,
//! and flags results whose winning probability is low.

use super::argmax;
use crate::models::{ClassProbability, Prediction};

/// Default threshold under which a winning probability is considered weak
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Formats raw classifier output into a `Prediction`
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    /// Winning probability below which the prediction is flagged
    low_confidence_threshold: f64,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self {
            low_confidence_threshold: LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair probabilities with their classes and pick the winner.
    ///
    /// Returns `None` when there are no classes to choose from.
    pub fn format(
        &self,
        classes: &[String],
        probabilities: &[f64],
        model_version: &str,
    ) -> Option<Prediction> {
        let winner = argmax(probabilities)?;
        let action = classes.get(winner)?.clone();
        let probabilities = classes
            .iter()
            .zip(probabilities)
            .map(|(action, &probability)| ClassProbability {
                action: action.clone(),
                probability,
            })
            .collect();

        Some(Prediction {
            action,
            probabilities,
            model_version: model_version.to_string(),
        })
    }

    /// Probability of the predicted action
    pub fn confidence(&self, prediction: &Prediction) -> f64 {
        prediction.probability_of(&prediction.action).unwrap_or(0.0)
    }

    pub fn is_low_confidence(&self, prediction: &Prediction) -> bool {
        self.confidence(prediction) < self.low_confidence_threshold
    }
}
