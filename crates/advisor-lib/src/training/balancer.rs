//! Class-imbalance correction by seeded up-sampling
//!
//! Every minority class is topped up to the majority count by drawing
//! from its own examples with replacement. Majority classes are never
//! down-sampled, so the result holds `max_count * class_count` examples.

use crate::error::TrainingAbort;
use crate::models::TrainingExample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Example count per action label, ordered by label
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassDistribution(pub BTreeMap<String, usize>);

impl ClassDistribution {
    pub fn of(examples: &[TrainingExample]) -> Self {
        let mut counts = BTreeMap::new();
        for example in examples {
            *counts.entry(example.action.clone()).or_insert(0) += 1;
        }
        Self(counts)
    }

    pub fn count(&self, action: &str) -> usize {
        self.0.get(action).copied().unwrap_or(0)
    }

    pub fn max_count(&self) -> usize {
        self.0.values().copied().max().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_balanced(&self) -> bool {
        let mut counts = self.0.values();
        match counts.next() {
            Some(first) => counts.all(|c| c == first),
            None => true,
        }
    }
}

/// Seeded up-sampler guarding a required label space
#[derive(Debug, Clone)]
pub struct ClassBalancer {
    seed: u64,
    required_actions: Vec<String>,
}

impl ClassBalancer {
    pub fn new(seed: u64, required_actions: Vec<String>) -> Self {
        Self {
            seed,
            required_actions,
        }
    }

    pub fn required_actions(&self) -> &[String] {
        &self.required_actions
    }

    /// Up-sample every minority class to the majority count.
    ///
    /// Original examples keep their order at the front; drawn duplicates
    /// follow, grouped by class in label order.
    pub fn balance(
        &self,
        dataset: &[TrainingExample],
    ) -> Result<Vec<TrainingExample>, TrainingAbort> {
        if dataset.is_empty() {
            return Err(TrainingAbort::EmptyDataset);
        }

        let distribution = ClassDistribution::of(dataset);
        if let Some(action) = self
            .required_actions
            .iter()
            .find(|a| distribution.count(a) == 0)
        {
            return Err(TrainingAbort::MissingClass {
                action: action.clone(),
            });
        }

        let target = distribution.max_count();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut balanced = dataset.to_vec();
        balanced.reserve(target * distribution.0.len() - dataset.len());

        for (action, &count) in &distribution.0 {
            if count == target {
                continue;
            }
            let members: Vec<&TrainingExample> =
                dataset.iter().filter(|e| &e.action == action).collect();
            for _ in count..target {
                let pick = rng.gen_range(0..members.len());
                balanced.push(members[pick].clone());
            }
            debug!(action = %action, from = count, to = target, "Up-sampled class");
        }

        Ok(balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::reading;
    use crate::models::{CropType, SoilType};

    fn skewed(irrigate: usize, fertilize: usize) -> Vec<TrainingExample> {
        let irrigate = (0..irrigate).map(|i| TrainingExample {
            reading: reading(CropType::Rice, SoilType::Sandy, 10.0 + i as f64 * 0.1, 3),
            action: "Irrigate".to_string(),
        });
        let fertilize = (0..fertilize).map(|i| TrainingExample {
            reading: reading(CropType::Wheat, SoilType::Clay, 50.0 + i as f64, 1),
            action: "Fertilize".to_string(),
        });
        irrigate.chain(fertilize).collect()
    }

    fn balancer(seed: u64) -> ClassBalancer {
        ClassBalancer::new(seed, vec!["Fertilize".to_string()])
    }

    #[test]
    fn test_minority_is_upsampled_to_majority() {
        let balanced = balancer(42).balance(&skewed(95, 5)).unwrap();
        let distribution = ClassDistribution::of(&balanced);

        assert_eq!(balanced.len(), 190);
        assert_eq!(distribution.count("Irrigate"), 95);
        assert_eq!(distribution.count("Fertilize"), 95);
        assert!(distribution.is_balanced());
    }

    #[test]
    fn test_upsampled_rows_come_from_their_class() {
        let dataset = skewed(20, 3);
        let balanced = balancer(7).balance(&dataset).unwrap();
        for example in balanced.iter().filter(|e| e.action == "Fertilize") {
            assert!(dataset.contains(example));
        }
    }

    #[test]
    fn test_balance_is_reproducible_for_seed() {
        let dataset = skewed(30, 4);
        let first = balancer(11).balance(&dataset).unwrap();
        let second = balancer(11).balance(&dataset).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_balanced_input_is_untouched() {
        let dataset = skewed(6, 6);
        assert_eq!(balancer(1).balance(&dataset).unwrap(), dataset);
    }

    #[test]
    fn test_missing_required_class_aborts() {
        let err = balancer(42).balance(&skewed(10, 0)).unwrap_err();
        assert_eq!(
            err,
            TrainingAbort::MissingClass {
                action: "Fertilize".to_string()
            }
        );
    }

    #[test]
    fn test_empty_dataset_aborts() {
        assert_eq!(
            balancer(42).balance(&[]).unwrap_err(),
            TrainingAbort::EmptyDataset
        );
    }
}
