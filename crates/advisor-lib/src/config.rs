//! Advisor configuration
//!
//! Loaded from an optional file plus `ADVISOR_`-prefixed environment
//! variables (`__` separates nested keys, e.g. `ADVISOR_TRAINING__SEED`).
//! Every field has a default, so no source is required.

use crate::predictor::ForestConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ADVISOR";

/// Paths shared by training, prediction and history review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Persisted model artifact
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Metrics written next to the artifact
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,

    /// Append-only prediction history
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    #[serde(default)]
    pub training: TrainingConfig,
}

/// Parameters of an offline training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Share of each class held out for evaluation
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,

    /// Actions that must have examples or training aborts
    #[serde(default = "default_required_actions")]
    pub required_actions: Vec<String>,

    #[serde(default)]
    pub forest: ForestConfig,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/crop_model.json")
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("models/metrics.json")
}

fn default_history_path() -> PathBuf {
    PathBuf::from("data/prediction_history.csv")
}

fn default_seed() -> u64 {
    42
}

fn default_test_ratio() -> f64 {
    0.25
}

fn default_required_actions() -> Vec<String> {
    vec!["Fertilize".to_string()]
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            metrics_path: default_metrics_path(),
            history_path: default_history_path(),
            training: TrainingConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            test_ratio: default_test_ratio(),
            required_actions: default_required_actions(),
            forest: ForestConfig::default(),
        }
    }
}

impl AdvisorConfig {
    /// Load from an optional config file, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::builder(file)
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Start a builder with `file` as the first source, for callers that
    /// layer their own sources on top
    pub fn builder(file: Option<&Path>) -> config::ConfigBuilder<config::builder::DefaultState> {
        let builder = config::Config::builder();
        match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder,
        }
    }
}

/// `ADVISOR_` environment source
pub fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("training.required_actions")
}
