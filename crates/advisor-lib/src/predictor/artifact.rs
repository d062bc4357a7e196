//! Versioned, checksummed model artifact
//!
//! On disk the artifact is a JSON envelope holding the format version, the
//! SHA256 checksum of the serialized model, and the model itself. Any
//! mismatch on load is reported as a corrupt artifact.

use super::{Classifier, ClassifierState, FeatureEncoder, Vocabulary};
use crate::error::ArtifactError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Current on-disk layout version
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Length of the checksum prefix used as a model version string
const VERSION_LEN: usize = 12;

/// Everything needed to answer predictions: vocabulary, classifier state, classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    vocabulary: Vocabulary,
    classifier: ClassifierState,
    classes: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    format_version: u32,
    checksum: String,
    model: ModelArtifact,
}

impl ModelArtifact {
    /// Bundle a fitted classifier with the vocabulary it was trained against
    pub fn new(vocabulary: Vocabulary, classifier: ClassifierState) -> Self {
        let classes = classifier.classes().to_vec();
        Self {
            vocabulary,
            classifier,
            classes,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn classifier(&self) -> &ClassifierState {
        &self.classifier
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encoder(&self) -> FeatureEncoder {
        FeatureEncoder::new(self.vocabulary.clone())
    }

    /// SHA256 of the serialized model
    pub fn checksum(&self) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_vec(self)?;
        Ok(compute_checksum(&payload))
    }

    /// Short content-derived version string
    pub fn version(&self) -> Result<String, serde_json::Error> {
        let checksum = self.checksum()?;
        Ok(checksum[..VERSION_LEN.min(checksum.len())].to_string())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let envelope = ArtifactEnvelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: self.checksum()?,
            model: self.clone(),
        };
        serde_json::to_vec(&envelope)
    }

    /// Decode and verify an artifact; `path` is only used for error reporting
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, ArtifactError> {
        let corrupt = |reason: String| ArtifactError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let envelope: ArtifactEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| corrupt(format!("malformed artifact: {}", e)))?;

        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}, expected {}",
                envelope.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }

        let computed = envelope
            .model
            .checksum()
            .map_err(|e| corrupt(format!("failed to re-serialize model: {}", e)))?;
        if computed != envelope.checksum {
            return Err(corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                envelope.checksum, computed
            )));
        }

        envelope.model.check_consistency().map_err(corrupt)?;
        Ok(envelope.model)
    }

    /// Read and verify an artifact from disk
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ArtifactError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ArtifactError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("unreadable: {}", e),
            },
        })?;
        Self::from_bytes(&bytes, path)
    }

    /// Write the artifact atomically through a temp file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let bytes = self.to_bytes().map_err(std::io::Error::other)?;
        write_atomic(path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Model artifact written");
        Ok(())
    }

    fn check_consistency(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("artifact has an empty class list".to_string());
        }
        if self.classes != self.classifier.classes() {
            return Err("class list does not match classifier state".to_string());
        }
        let ClassifierState::RandomForest(forest) = &self.classifier;
        if forest.n_features() != self.vocabulary.width() {
            return Err(format!(
                "classifier expects {} features but vocabulary encodes {}",
                forest.n_features(),
                self.vocabulary.width()
            ));
        }
        forest.check_shape()
    }
}

/// Compute SHA256 checksum of data
pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Replace `path` with `data` via a synced temp file and rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::labelled_dataset;
    use crate::predictor::{ForestConfig, RandomForest};
    use tempfile::TempDir;

    fn trained_artifact() -> ModelArtifact {
        let dataset = labelled_dataset(60);
        let vocabulary = Vocabulary::fit(&dataset);
        let encoder = FeatureEncoder::new(vocabulary.clone());
        let features = encoder.encode_all(&dataset);
        let labels: Vec<String> = dataset.iter().map(|e| e.action.clone()).collect();
        let mut forest = RandomForest::new(ForestConfig {
            n_trees: 5,
            ..Default::default()
        });
        forest.fit(&features, &labels).unwrap();
        ModelArtifact::new(vocabulary, ClassifierState::RandomForest(forest))
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("crop_model.json");
        let artifact = trained_artifact();

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        assert_eq!(loaded, artifact);
        assert_eq!(loaded.version().unwrap(), artifact.version().unwrap());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = ModelArtifact::from_bytes(b"not json", Path::new("x")).unwrap_err();
        assert_eq!(err.kind(), "ArtifactCorrupt");
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let bytes = br#"{"format_version":1,"checksum":"00","model":{"weights":[1,2,3]}}"#;
        let err = ModelArtifact::from_bytes(bytes, Path::new("x")).unwrap_err();
        assert_eq!(err.kind(), "ArtifactCorrupt");
    }

    #[test]
    fn test_tampered_checksum_is_corrupt() {
        let artifact = trained_artifact();
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&artifact.to_bytes().unwrap()).unwrap();
        envelope["checksum"] = serde_json::Value::String("deadbeef".to_string());
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let err = ModelArtifact::from_bytes(&bytes, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_future_format_version_is_corrupt() {
        let artifact = trained_artifact();
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&artifact.to_bytes().unwrap()).unwrap();
        envelope["format_version"] = serde_json::json!(ARTIFACT_FORMAT_VERSION + 1);
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let err = ModelArtifact::from_bytes(&bytes, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("unsupported format version"));
    }

    /// Re-seal a model after editing its JSON so only the shape check can reject it
    fn resealed(edit: impl FnOnce(&mut serde_json::Value)) -> Vec<u8> {
        let mut model = serde_json::to_value(trained_artifact()).unwrap();
        edit(&mut model["classifier"]);
        let model: ModelArtifact = serde_json::from_value(model).unwrap();
        model.to_bytes().unwrap()
    }

    #[test]
    fn test_out_of_range_child_is_corrupt() {
        let bytes = resealed(|forest| {
            forest["trees"][0]["nodes"] = serde_json::json!([
                {"type": "split", "feature": 0, "threshold": 0.5, "left": 7, "right": 7}
            ]);
        });
        let err = ModelArtifact::from_bytes(&bytes, Path::new("x")).unwrap_err();
        assert_eq!(err.kind(), "ArtifactCorrupt");
        assert!(err.to_string().contains("invalid child 7"));
    }

    #[test]
    fn test_cyclic_tree_is_corrupt() {
        let bytes = resealed(|forest| {
            forest["trees"][0]["nodes"] = serde_json::json!([
                {"type": "split", "feature": 0, "threshold": 0.5, "left": 0, "right": 1},
                {"type": "leaf", "distribution": [1.0, 0.0, 0.0]}
            ]);
        });
        let err = ModelArtifact::from_bytes(&bytes, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("invalid child 0"));
    }

    #[test]
    fn test_malformed_trees_are_corrupt() {
        let cases = [
            serde_json::json!([]),
            serde_json::json!([{"type": "leaf", "distribution": [1.0]}]),
            serde_json::json!([
                {"type": "split", "feature": 999, "threshold": 0.5, "left": 1, "right": 2},
                {"type": "leaf", "distribution": [1.0, 0.0, 0.0]},
                {"type": "leaf", "distribution": [0.0, 1.0, 0.0]}
            ]),
        ];
        for nodes in cases {
            let bytes = resealed(|forest| forest["trees"][0]["nodes"] = nodes.clone());
            let err = ModelArtifact::from_bytes(&bytes, Path::new("x")).unwrap_err();
            assert_eq!(err.kind(), "ArtifactCorrupt", "nodes: {}", nodes);
        }

        let bytes = resealed(|forest| forest["trees"] = serde_json::json!([]));
        let err = ModelArtifact::from_bytes(&bytes, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("no trees"));
    }

    #[test]
    fn test_checksum_of_known_input() {
        assert_eq!(
            compute_checksum(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
