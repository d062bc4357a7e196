//! Offline training pipeline
//!
//! balance -> vocabulary -> encode -> stratified split -> fit -> evaluate.
//! Given the same dataset and seed every step is deterministic, so two runs
//! produce byte-identical artifacts and metrics.

use super::balancer::{ClassBalancer, ClassDistribution};
use super::metrics::ModelMetrics;
use super::split::stratified_split;
use crate::config::TrainingConfig;
use crate::error::TrainingError;
use crate::models::{Prediction, SensorReading, TrainingExample};
use crate::predictor::{
    Classifier, ClassifierState, FeatureEncoder, ForestConfig, ModelArtifact, OutputFormatter,
    RandomForest, Vocabulary,
};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a successful training run, not yet persisted
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub artifact: ModelArtifact,
    pub metrics: ModelMetrics,
    /// Class counts of the input dataset
    pub distribution_before: ClassDistribution,
    /// Class counts after up-sampling
    pub distribution_after: ClassDistribution,
    /// The low-nutrient probe run through the fresh model
    pub probe: Option<Prediction>,
    pub train_size: usize,
    pub test_size: usize,
}

/// Orchestrates a training run from a labelled dataset
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train a model. Aborts before fitting if balancing fails.
    pub fn train(
        &self,
        dataset: &[TrainingExample],
        seed: u64,
    ) -> Result<TrainedModel, TrainingError> {
        let start = Instant::now();
        let distribution_before = ClassDistribution::of(dataset);
        info!(distribution = ?distribution_before.0, "Class distribution before balancing");

        let balancer = ClassBalancer::new(seed, self.config.required_actions.clone());
        let balanced = balancer.balance(dataset).map_err(|abort| {
            warn!(event = "training_aborted", reason = %abort, "Training aborted");
            abort
        })?;
        let distribution_after = ClassDistribution::of(&balanced);
        info!(distribution = ?distribution_after.0, "Class distribution after balancing");

        let vocabulary = Vocabulary::fit(&balanced);
        let encoder = FeatureEncoder::new(vocabulary.clone());
        let features = encoder.encode_all(&balanced);
        let labels: Vec<String> = balanced.iter().map(|e| e.action.clone()).collect();

        let split = stratified_split(&labels, self.config.test_ratio, seed);
        if split.test.is_empty() {
            warn!("Held-out partition is empty; metrics will be zero");
        }
        let pick = |indices: &[usize]| -> (Vec<Vec<f64>>, Vec<String>) {
            indices
                .iter()
                .map(|&i| (features[i].clone(), labels[i].clone()))
                .unzip()
        };
        let (train_x, train_y) = pick(&split.train);
        let (test_x, test_y) = pick(&split.test);

        let mut forest = RandomForest::new(ForestConfig {
            seed,
            ..self.config.forest.clone()
        });
        forest.fit(&train_x, &train_y)?;
        debug!(
            trees = forest.trees().len(),
            features = forest.n_features(),
            "Forest fitted"
        );

        let predicted: Vec<String> = test_x
            .iter()
            .map(|x| forest.predict(x).unwrap_or_default().to_string())
            .collect();
        let metrics = ModelMetrics::evaluate(forest.classes(), &test_y, &predicted);

        let artifact = ModelArtifact::new(vocabulary, ClassifierState::RandomForest(forest));
        let probe = probe(&artifact);

        info!(
            event = "training_completed",
            examples = balanced.len(),
            train = split.train.len(),
            test = split.test.len(),
            accuracy = metrics.accuracy,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Training completed"
        );

        Ok(TrainedModel {
            artifact,
            metrics,
            distribution_before,
            distribution_after,
            probe,
            train_size: split.train.len(),
            test_size: split.test.len(),
        })
    }

    /// Write the artifact, then the metrics.
    ///
    /// The artifact is required; a metrics write failure is only logged.
    pub fn persist(
        &self,
        model: &TrainedModel,
        artifact_path: &Path,
        metrics_path: &Path,
    ) -> Result<(), TrainingError> {
        model
            .artifact
            .save(artifact_path)
            .map_err(|source| TrainingError::Persist {
                what: "model artifact",
                path: artifact_path.to_path_buf(),
                source,
            })?;
        info!(path = %artifact_path.display(), "Model artifact saved");

        match model.metrics.save(metrics_path) {
            Ok(()) => info!(path = %metrics_path.display(), "Metrics saved"),
            Err(e) => warn!(path = %metrics_path.display(), error = %e, "Failed to save metrics"),
        }
        Ok(())
    }
}

/// Run the low-nutrient reading through a fresh artifact and log the outcome
fn probe(artifact: &ModelArtifact) -> Option<Prediction> {
    let reading = SensorReading::low_nutrient_probe();
    let classifier = artifact.classifier();
    let probabilities = classifier.predict_proba(&artifact.encoder().encode(&reading));
    let version = artifact.version().ok()?;
    let prediction = OutputFormatter::new().format(classifier.classes(), &probabilities, &version)?;

    for p in &prediction.probabilities {
        info!(action = %p.action, probability = p.probability, "Probe probability");
    }
    Some(prediction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainingAbort;
    use crate::models::fixtures::labelled_dataset;
    use crate::predictor::PredictionService;
    use tempfile::TempDir;

    fn trainer() -> ModelTrainer {
        ModelTrainer::new(TrainingConfig {
            forest: ForestConfig {
                n_trees: 15,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_training_produces_balanced_model_and_metrics() {
        let model = trainer().train(&labelled_dataset(120), 42).unwrap();

        assert!(model.distribution_after.is_balanced());
        assert_eq!(
            model.distribution_after.max_count(),
            model.distribution_before.max_count()
        );
        assert_eq!(model.metrics.classes, model.artifact.classes());
        assert_eq!(model.metrics.confusion_matrix.len(), model.artifact.classes().len());
        assert_eq!(model.train_size + model.test_size, model.distribution_after.total());
        assert!(model.metrics.accuracy > 0.5);
    }

    #[test]
    fn test_probe_returns_known_class() {
        let model = trainer().train(&labelled_dataset(90), 1).unwrap();
        let probe = model.probe.unwrap();
        assert!(model.artifact.classes().contains(&probe.action));
        let sum: f64 = probe.probabilities.iter().map(|p| p.probability).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_training_is_deterministic() {
        let dataset = labelled_dataset(80);
        let first = trainer().train(&dataset, 5).unwrap();
        let second = trainer().train(&dataset, 5).unwrap();

        assert_eq!(
            first.artifact.to_bytes().unwrap(),
            second.artifact.to_bytes().unwrap()
        );
        assert_eq!(
            first.metrics.to_pretty_json().unwrap(),
            second.metrics.to_pretty_json().unwrap()
        );
    }

    #[test]
    fn test_missing_required_class_aborts_without_writing() {
        let dir = TempDir::new().unwrap();
        let artifact_path = dir.path().join("crop_model.json");
        let dataset: Vec<_> = labelled_dataset(60)
            .into_iter()
            .filter(|e| e.action != "Fertilize")
            .collect();

        match trainer().train(&dataset, 42) {
            Err(TrainingError::Abort(TrainingAbort::MissingClass { action })) => {
                assert_eq!(action, "Fertilize")
            }
            other => panic!("expected MissingClass abort, got {:?}", other.map(|_| ())),
        }
        assert!(!artifact_path.exists());
    }

    #[test]
    fn test_persisted_artifact_serves_predictions() {
        let dir = TempDir::new().unwrap();
        let artifact_path = dir.path().join("models").join("crop_model.json");
        let metrics_path = dir.path().join("models").join("metrics.json");

        let trainer = trainer();
        let model = trainer.train(&labelled_dataset(90), 42).unwrap();
        trainer.persist(&model, &artifact_path, &metrics_path).unwrap();

        let service = PredictionService::load(&artifact_path);
        assert!(service.is_available());
        assert_eq!(
            service.model_version().unwrap(),
            model.artifact.version().unwrap()
        );
        assert_eq!(
            ModelMetrics::load(&metrics_path).unwrap(),
            Some(model.metrics)
        );
    }

    #[test]
    fn test_metrics_failure_does_not_block_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact_path = dir.path().join("crop_model.json");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let metrics_path = blocker.join("metrics.json");

        let trainer = trainer();
        let model = trainer.train(&labelled_dataset(60), 42).unwrap();
        trainer.persist(&model, &artifact_path, &metrics_path).unwrap();

        assert!(artifact_path.exists());
        assert!(!metrics_path.exists());
    }
}
