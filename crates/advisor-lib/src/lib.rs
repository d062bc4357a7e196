//! Core library for the crop advisor
//!
//! This crate provides:
//! - Typed sensor readings with domain validation
//! - Feature encoding and a bagged decision-tree classifier
//! - Offline training with class balancing and held-out evaluation
//! - A prediction service over a persisted model artifact
//! - The append-only prediction history
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod training;

pub use config::{AdvisorConfig, TrainingConfig};
pub use error::{
    ArtifactError, FieldViolation, FilterError, HistoryError, PredictError, TrainingAbort,
    TrainingError, ValidationError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use history::{aggregate, export, HistoryFilter, HistoryStore, HistorySummary, SeriesPoint};
pub use models::*;
pub use observability::{AdvisorMetrics, StructuredLogger};
pub use predictor::{ModelArtifact, PredictionService};
pub use training::{ModelMetrics, ModelTrainer, TrainedModel};
