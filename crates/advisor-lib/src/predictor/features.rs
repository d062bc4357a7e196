//! Feature encoding for the action classifier
//!
//! Categorical fields are expanded to one indicator per category in the
//! order the categories were first seen at training time. Numeric fields
//! follow unchanged and unscaled. A category the vocabulary has never seen
//! encodes as an all-zero indicator block.

use crate::models::{SensorReading, TrainingExample};
use serde::{Deserialize, Serialize};

/// Number of numeric passthrough features
pub const NUM_NUMERIC_FEATURES: usize = 5;

const NUMERIC_FEATURE_NAMES: [&str; NUM_NUMERIC_FEATURES] = [
    "soil_moisture",
    "temperature",
    "humidity",
    "nutrient_level",
    "soil_pH",
];

/// Category-to-indicator mapping frozen at training time.
///
/// The position of a category in its list is its indicator index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    crop_types: Vec<String>,
    soil_types: Vec<String>,
}

impl Vocabulary {
    /// Capture categories in first-seen order
    pub fn fit(examples: &[TrainingExample]) -> Self {
        let mut vocabulary = Self::default();
        for example in examples {
            push_unique(&mut vocabulary.crop_types, example.reading.crop_type.as_str());
            push_unique(&mut vocabulary.soil_types, example.reading.soil_type.as_str());
        }
        vocabulary
    }

    pub fn crop_types(&self) -> &[String] {
        &self.crop_types
    }

    pub fn soil_types(&self) -> &[String] {
        &self.soil_types
    }

    pub fn crop_index(&self, crop_type: &str) -> Option<usize> {
        self.crop_types.iter().position(|c| c == crop_type)
    }

    pub fn soil_index(&self, soil_type: &str) -> Option<usize> {
        self.soil_types.iter().position(|s| s == soil_type)
    }

    /// Width of an encoded feature vector
    pub fn width(&self) -> usize {
        self.crop_types.len() + self.soil_types.len() + NUM_NUMERIC_FEATURES
    }

    /// Column names of an encoded feature vector, in order
    pub fn feature_names(&self) -> Vec<String> {
        self.crop_types
            .iter()
            .map(|c| format!("crop_type={}", c))
            .chain(self.soil_types.iter().map(|s| format!("soil_type={}", s)))
            .chain(NUMERIC_FEATURE_NAMES.iter().map(|n| n.to_string()))
            .collect()
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Encodes readings against a fixed vocabulary
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    vocabulary: Vocabulary,
}

impl FeatureEncoder {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn encode(&self, reading: &SensorReading) -> Vec<f64> {
        encode(reading, &self.vocabulary)
    }

    pub fn encode_all(&self, examples: &[TrainingExample]) -> Vec<Vec<f64>> {
        examples.iter().map(|e| self.encode(&e.reading)).collect()
    }
}

/// Encode a single reading. Never fails.
pub fn encode(reading: &SensorReading, vocabulary: &Vocabulary) -> Vec<f64> {
    let mut features = vec![0.0; vocabulary.width()];

    if let Some(i) = vocabulary.crop_index(reading.crop_type.as_str()) {
        features[i] = 1.0;
    }
    let soil_offset = vocabulary.crop_types.len();
    if let Some(i) = vocabulary.soil_index(reading.soil_type.as_str()) {
        features[soil_offset + i] = 1.0;
    }

    let numeric_offset = soil_offset + vocabulary.soil_types.len();
    features[numeric_offset] = reading.soil_moisture;
    features[numeric_offset + 1] = reading.temperature;
    features[numeric_offset + 2] = reading.humidity;
    features[numeric_offset + 3] = f64::from(reading.nutrient_level);
    features[numeric_offset + 4] = reading.soil_ph;

    features
}
