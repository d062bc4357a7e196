//! Core data models for the crop advisor

use crate::error::{FieldViolation, ValidationError};
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const SOIL_MOISTURE_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 10.0..=45.0;
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const NUTRIENT_LEVEL_RANGE: RangeInclusive<u8> = 1..=5;
pub const SOIL_PH_RANGE: RangeInclusive<f64> = 0.0..=14.0;

/// Serialized timestamp layout, local time at second precision
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

macro_rules! vocabulary_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(trimmed))
                    .ok_or_else(|| format!("unknown {} {:?}", stringify!($name), s))
            }
        }
    };
}

vocabulary_enum!(
    /// Crop grown in the sensed field
    CropType { Wheat, Rice, Corn, Soybean, Sugarcane }
);

vocabulary_enum!(
    /// Soil classification of the sensed field
    SoilType { Clay, Sandy, Loamy, Silty, Peaty, Chalky }
);

/// One set of soil and climate sensor inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub crop_type: CropType,
    pub soil_type: SoilType,
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub nutrient_level: u8,
    #[serde(rename = "soil_pH")]
    pub soil_ph: f64,
}

impl SensorReading {
    /// Low-nutrient wheat on clay; a model trained with a fertilize class
    /// is expected to handle it without error
    pub fn low_nutrient_probe() -> Self {
        Self {
            crop_type: CropType::Wheat,
            soil_type: SoilType::Clay,
            soil_moisture: 45.0,
            temperature: 28.0,
            humidity: 60.0,
            nutrient_level: 1,
            soil_ph: 6.2,
        }
    }

    /// Check every numeric field against its declared domain.
    ///
    /// All violations are collected so the caller can report them together.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        check_float("soil_moisture", self.soil_moisture, &SOIL_MOISTURE_RANGE, &mut violations);
        check_float("temperature", self.temperature, &TEMPERATURE_RANGE, &mut violations);
        check_float("humidity", self.humidity, &HUMIDITY_RANGE, &mut violations);
        if !NUTRIENT_LEVEL_RANGE.contains(&self.nutrient_level) {
            violations.push(FieldViolation {
                field: "nutrient_level",
                value: self.nutrient_level.to_string(),
                expected: format!(
                    "{}..={}",
                    NUTRIENT_LEVEL_RANGE.start(),
                    NUTRIENT_LEVEL_RANGE.end()
                ),
            });
        }
        check_float("soil_pH", self.soil_ph, &SOIL_PH_RANGE, &mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

fn check_float(
    field: &'static str,
    value: f64,
    range: &RangeInclusive<f64>,
    violations: &mut Vec<FieldViolation>,
) {
    if !value.is_finite() || !range.contains(&value) {
        violations.push(FieldViolation {
            field,
            value: value.to_string(),
            expected: format!("{}..={}", range.start(), range.end()),
        });
    }
}

/// A reading as it arrives over the wire, before any field is trusted.
///
/// Categories are plain text and the nutrient level is any number, so a
/// value outside the typed domain becomes a `FieldViolation` instead of a
/// decoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub crop_type: String,
    pub soil_type: String,
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub nutrient_level: f64,
    #[serde(rename = "soil_pH")]
    pub soil_ph: f64,
}

impl From<&SensorReading> for RawReading {
    fn from(reading: &SensorReading) -> Self {
        Self {
            crop_type: reading.crop_type.to_string(),
            soil_type: reading.soil_type.to_string(),
            soil_moisture: reading.soil_moisture,
            temperature: reading.temperature,
            humidity: reading.humidity,
            nutrient_level: f64::from(reading.nutrient_level),
            soil_ph: reading.soil_ph,
        }
    }
}

impl TryFrom<RawReading> for SensorReading {
    type Error = ValidationError;

    /// Check every field and report all violations at once
    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        let mut violations = Vec::new();
        let crop_type = category::<CropType>("crop_type", &raw.crop_type, &mut violations);
        let soil_type = category::<SoilType>("soil_type", &raw.soil_type, &mut violations);
        check_float("soil_moisture", raw.soil_moisture, &SOIL_MOISTURE_RANGE, &mut violations);
        check_float("temperature", raw.temperature, &TEMPERATURE_RANGE, &mut violations);
        check_float("humidity", raw.humidity, &HUMIDITY_RANGE, &mut violations);
        let nutrient_level = nutrient(raw.nutrient_level, &mut violations);
        check_float("soil_pH", raw.soil_ph, &SOIL_PH_RANGE, &mut violations);

        match (crop_type, soil_type, nutrient_level) {
            (Some(crop_type), Some(soil_type), Some(nutrient_level)) if violations.is_empty() => {
                Ok(SensorReading {
                    crop_type,
                    soil_type,
                    soil_moisture: raw.soil_moisture,
                    temperature: raw.temperature,
                    humidity: raw.humidity,
                    nutrient_level,
                    soil_ph: raw.soil_ph,
                })
            }
            _ => Err(ValidationError { violations }),
        }
    }
}

fn category<T: FromStr>(
    field: &'static str,
    value: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<T> {
    let parsed = value.parse::<T>().ok();
    if parsed.is_none() {
        violations.push(FieldViolation {
            field,
            value: value.to_string(),
            expected: "a known category".to_string(),
        });
    }
    parsed
}

fn nutrient(value: f64, violations: &mut Vec<FieldViolation>) -> Option<u8> {
    let level = (value.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&value))
        .then_some(value as u8)
        .filter(|level| NUTRIENT_LEVEL_RANGE.contains(level));
    if level.is_none() {
        violations.push(FieldViolation {
            field: "nutrient_level",
            value: value.to_string(),
            expected: format!(
                "{}..={}",
                NUTRIENT_LEVEL_RANGE.start(),
                NUTRIENT_LEVEL_RANGE.end()
            ),
        });
    }
    level
}

/// Tabular column names of a reading, in canonical order
pub const READING_COLUMNS: [&str; 7] = [
    "crop_type",
    "soil_type",
    "soil_moisture",
    "temperature",
    "humidity",
    "nutrient_level",
    "soil_pH",
];

impl SensorReading {
    /// Build a reading from named tabular fields.
    ///
    /// `field` returns the raw text of a column. Only parsing is checked
    /// here; domain checks are left to `validate`.
    pub fn from_fields<'a>(field: impl Fn(&str) -> Option<&'a str>) -> Result<Self, String> {
        let text = |name: &str| -> Result<&'a str, String> {
            match field(name).map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(format!("missing value for {}", name)),
            }
        };
        let number = |name: &str| -> Result<f64, String> {
            let raw = text(name)?;
            raw.parse::<f64>()
                .map_err(|_| format!("{} is not a number: {:?}", name, raw))
        };

        let nutrient = number("nutrient_level")?;
        if nutrient.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&nutrient) {
            return Err(format!("nutrient_level is not a small integer: {}", nutrient));
        }

        Ok(Self {
            crop_type: text("crop_type")?.parse()?,
            soil_type: text("soil_type")?.parse()?,
            soil_moisture: number("soil_moisture")?,
            temperature: number("temperature")?,
            humidity: number("humidity")?,
            nutrient_level: nutrient as u8,
            soil_ph: number("soil_pH")?,
        })
    }

    /// Field values as text, ordered like `READING_COLUMNS`
    pub fn to_fields(&self) -> [String; 7] {
        [
            self.crop_type.to_string(),
            self.soil_type.to_string(),
            self.soil_moisture.to_string(),
            self.temperature.to_string(),
            self.humidity.to_string(),
            self.nutrient_level.to_string(),
            self.soil_ph.to_string(),
        ]
    }
}

/// A reading paired with its observed ground-truth action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub reading: SensorReading,
    pub action: String,
}

/// A stored prediction; never updated once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub reading: SensorReading,
    pub predicted_action: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

impl PredictionRecord {
    /// Create a record stamped with the current local time, truncated to seconds
    pub fn now(reading: SensorReading, predicted_action: impl Into<String>) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            reading,
            predicted_action: predicted_action.into(),
            timestamp: truncate_to_seconds(now),
        }
    }
}

pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

pub(crate) mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Probability assigned to one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub action: String,
    pub probability: f64,
}

/// Result of a single predict call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub action: String,
    /// Ordered by the model's canonical class list
    pub probabilities: Vec<ClassProbability>,
    pub model_version: String,
}

impl Prediction {
    /// Action label with its first letter capitalized, for result cards
    pub fn display_action(&self) -> String {
        let mut chars = self.action.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn probability_of(&self, action: &str) -> Option<f64> {
        self.probabilities
            .iter()
            .find(|p| p.action == action)
            .map(|p| p.probability)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn low_nutrient_wheat() -> SensorReading {
        SensorReading::low_nutrient_probe()
    }

    pub fn reading(crop: CropType, soil: SoilType, moisture: f64, nutrient: u8) -> SensorReading {
        SensorReading {
            crop_type: crop,
            soil_type: soil,
            soil_moisture: moisture,
            temperature: 30.0,
            humidity: 65.0,
            nutrient_level: nutrient,
            soil_ph: 6.5,
        }
    }

    /// Dry fields need water, starved fields need fertilizer, others are fine
    pub fn labelled_dataset(n: usize) -> Vec<TrainingExample> {
        (0..n)
            .map(|i| {
                let crop = CropType::ALL[i % CropType::ALL.len()];
                let soil = SoilType::ALL[i % SoilType::ALL.len()];
                let moisture = 10.0 + (i * 7 % 90) as f64;
                let nutrient = (i % 5) as u8 + 1;
                let action = if moisture < 35.0 {
                    "Irrigate"
                } else if nutrient == 1 {
                    "Fertilize"
                } else {
                    "None"
                };
                TrainingExample {
                    reading: reading(crop, soil, moisture, nutrient),
                    action: action.to_string(),
                }
            })
            .collect()
    }
}
