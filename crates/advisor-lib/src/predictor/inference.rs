//! Prediction service over a loaded model artifact
//!
//! The artifact is loaded once and then shared read-only by every predict
//! call. A failed load leaves the service in an explicit unavailable state
//! that every call reports until the artifact is reloaded.

use super::output::OutputFormatter;
use super::{Classifier, FeatureEncoder, ModelArtifact};
use crate::error::{ArtifactError, PredictError};
use crate::models::{Prediction, SensorReading};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum inference latency before warning
const MAX_INFERENCE_MS: u128 = 50;

struct LoadedModel {
    artifact: ModelArtifact,
    encoder: FeatureEncoder,
    version: String,
}

enum ServiceState {
    Ready(Arc<LoadedModel>),
    Unavailable(ArtifactError),
}

/// Answers single-reading predictions from a trained model
pub struct PredictionService {
    artifact_path: PathBuf,
    state: ServiceState,
    output_formatter: OutputFormatter,
    prediction_count: AtomicU64,
    rejected_count: AtomicU64,
    slow_prediction_count: AtomicU64,
}

impl PredictionService {
    /// Load the artifact at `path`. Never fails; check `is_available`.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let artifact_path = path.as_ref().to_path_buf();
        let state = Self::load_state(&artifact_path);
        Self::with_state(artifact_path, state)
    }

    /// Serve an in-memory artifact, e.g. straight after training
    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        let state = match Self::prepare(artifact) {
            Ok(model) => ServiceState::Ready(Arc::new(model)),
            Err(e) => ServiceState::Unavailable(ArtifactError::Corrupt {
                path: PathBuf::from("<memory>"),
                reason: e.to_string(),
            }),
        };
        Self::with_state(PathBuf::from("<memory>"), state)
    }

    fn with_state(artifact_path: PathBuf, state: ServiceState) -> Self {
        Self {
            artifact_path,
            state,
            output_formatter: OutputFormatter::new(),
            prediction_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            slow_prediction_count: AtomicU64::new(0),
        }
    }

    fn load_state(path: &Path) -> ServiceState {
        let loaded = ModelArtifact::load(path).and_then(|artifact| {
            Self::prepare(artifact).map_err(|e| ArtifactError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        });

        match loaded {
            Ok(model) => {
                info!(
                    path = %path.display(),
                    version = %model.version,
                    classes = ?model.artifact.classes(),
                    "Model artifact loaded"
                );
                ServiceState::Ready(Arc::new(model))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Model artifact unavailable");
                ServiceState::Unavailable(e)
            }
        }
    }

    fn prepare(artifact: ModelArtifact) -> Result<LoadedModel, serde_json::Error> {
        let version = artifact.version()?;
        let encoder = artifact.encoder();
        Ok(LoadedModel {
            artifact,
            encoder,
            version,
        })
    }

    /// Re-read the artifact from its original path, replacing the current state
    pub fn reload(&mut self) -> Result<(), ArtifactError> {
        self.state = Self::load_state(&self.artifact_path);
        self.availability()
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, ServiceState::Ready(_))
    }

    /// `Ok` when ready, otherwise the load failure
    pub fn availability(&self) -> Result<(), ArtifactError> {
        self.model().map(|_| ())
    }

    fn model(&self) -> Result<&LoadedModel, ArtifactError> {
        match &self.state {
            ServiceState::Ready(model) => Ok(model),
            ServiceState::Unavailable(e) => Err(e.clone()),
        }
    }

    pub fn classes(&self) -> Option<&[String]> {
        self.model().ok().map(|m| m.artifact.classes())
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model().ok().map(|m| m.version.as_str())
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        self.model().ok().map(|m| &m.artifact)
    }

    /// Validate, encode and classify one reading. Has no side effects
    /// beyond counters; recording the outcome is up to the caller.
    pub fn predict(&self, reading: &SensorReading) -> Result<Prediction, PredictError> {
        let model = self.model()?;

        if let Err(e) = reading.validate() {
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
            debug!(fields = ?e.fields(), "Reading rejected");
            return Err(e.into());
        }

        let start = Instant::now();
        let features = model.encoder.encode(reading);
        let classifier = model.artifact.classifier();
        let probabilities = classifier.predict_proba(&features);

        let prediction = self
            .output_formatter
            .format(classifier.classes(), &probabilities, &model.version)
            .ok_or_else(|| ArtifactError::Corrupt {
                path: self.artifact_path.clone(),
                reason: "classifier produced no classes".to_string(),
            })?;

        let elapsed = start.elapsed();
        self.prediction_count.fetch_add(1, Ordering::Relaxed);
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.slow_prediction_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_ms = elapsed.as_millis(),
                "Prediction exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(
                elapsed_us = elapsed.as_micros(),
                action = %prediction.action,
                "Prediction completed"
            );
        }

        Ok(prediction)
    }

    pub fn is_low_confidence(&self, prediction: &Prediction) -> bool {
        self.output_formatter.is_low_confidence(prediction)
    }

    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_predictions: self.prediction_count.load(Ordering::Relaxed),
            rejected_readings: self.rejected_count.load(Ordering::Relaxed),
            slow_predictions: self.slow_prediction_count.load(Ordering::Relaxed),
        }
    }
}

/// Inference statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferenceStats {
    pub total_predictions: u64,
    pub rejected_readings: u64,
    pub slow_predictions: u64,
}
