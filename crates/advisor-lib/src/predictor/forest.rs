//! Bagged decision-tree ensemble
//!
//! Each tree is grown on a bootstrap sample with Gini-impurity splits over a
//! random subset of features. Leaves hold class distributions and the forest
//! averages them, so probabilities always cover the full class list.

use super::{Classifier, FitError};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Minimum impurity decrease for a split to be kept
const MIN_IMPURITY_DECREASE: f64 = 1e-12;

/// Golden-ratio increment used to decorrelate per-tree seeds
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Configuration for the forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the ensemble
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    /// Maximum tree depth (unbounded if not set)
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Minimum samples a node needs before it may split
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    /// Features tried per split (square root of the width if not set)
    #[serde(default)]
    pub max_features: Option<usize>,
    /// Seed for bootstrap draws and feature sampling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_trees() -> usize {
    100
}

fn default_min_samples_split() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            max_features: None,
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single classification tree stored as a node arena; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn distribution(&self, features: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Reject arenas that `distribution` could not walk safely. Children
    /// always come after their parent, so a valid arena has no cycles.
    fn check_shape(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { distribution } => {
                    if distribution.len() != n_classes {
                        return Err(format!(
                            "leaf {} has {} probabilities for {} classes",
                            idx,
                            distribution.len(),
                            n_classes
                        ));
                    }
                    if distribution.iter().any(|p| !p.is_finite() || *p < 0.0) {
                        return Err(format!("leaf {} has an invalid probability", idx));
                    }
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} of {}",
                            idx, feature, n_features
                        ));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", idx, child));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    labels: &'a [usize],
    n_classes: usize,
    max_features: usize,
    config: &'a ForestConfig,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, samples: Vec<usize>) -> DecisionTree {
        self.grow(samples, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&samples);
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: normalize_counts(&counts),
        });

        let pure = counts.iter().filter(|c| **c > 0).count() <= 1;
        let depth_reached = self.config.max_depth.map(|d| depth >= d).unwrap_or(false);
        if pure || depth_reached || samples.len() < self.config.min_samples_split.max(2) {
            return idx;
        }

        let Some((feature, threshold)) = self.best_split(&samples, &counts) else {
            return idx;
        };

        let features = self.features;
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| features[s][feature] <= threshold);
        if left_samples.is_empty() || right_samples.is_empty() {
            return idx;
        }

        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &s in samples {
            counts[self.labels[s]] += 1;
        }
        counts
    }

    /// Scan a random feature subset; keeps drawing past the subset only
    /// until some valid split is found
    fn best_split(&mut self, samples: &[usize], counts: &[usize]) -> Option<(usize, f64)> {
        let n_features = self.features[samples[0]].len();
        let parent = gini(counts, samples.len());
        let order = index::sample(&mut self.rng, n_features, n_features).into_vec();

        let mut best: Option<(f64, usize, f64)> = None;
        for (tried, &feature) in order.iter().enumerate() {
            if tried >= self.max_features && best.is_some() {
                break;
            }
            if let Some((impurity, threshold)) = self.split_feature(samples, feature) {
                if impurity < parent - MIN_IMPURITY_DECREASE
                    && best.map(|(b, _, _)| impurity < b).unwrap_or(true)
                {
                    best = Some((impurity, feature, threshold));
                }
            }
        }
        best.map(|(_, feature, threshold)| (feature, threshold))
    }

    /// Lowest weighted child impurity over all thresholds of one feature
    fn split_feature(&self, samples: &[usize], feature: usize) -> Option<(f64, f64)> {
        let mut pairs: Vec<(f64, usize)> = samples
            .iter()
            .map(|&s| (self.features[s][feature], self.labels[s]))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let n = pairs.len();
        let mut left = vec![0usize; self.n_classes];
        let mut right = self.class_counts(samples);
        let mut best: Option<(f64, f64)> = None;

        for i in 1..n {
            let (prev_value, prev_label) = pairs[i - 1];
            left[prev_label] += 1;
            right[prev_label] -= 1;

            let value = pairs[i].0;
            if prev_value.partial_cmp(&value) != Some(Ordering::Less) {
                continue;
            }

            let weighted =
                (i as f64 * gini(&left, i) + (n - i) as f64 * gini(&right, n - i)) / n as f64;
            if best.map(|(b, _)| weighted < b).unwrap_or(true) {
                let mut threshold = prev_value + (value - prev_value) / 2.0;
                if threshold >= value {
                    threshold = prev_value;
                }
                best = Some((weighted, threshold));
            }
        }
        best
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn normalize_counts(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// Bagged ensemble of decision trees combined by averaged class probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    classes: Vec<String>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            classes: Vec::new(),
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Structural check for a forest read back from storage
    pub fn check_shape(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.check_shape(self.n_features, self.classes.len())
                .map_err(|e| format!("tree {}: {}", t, e))?;
        }
        Ok(())
    }

    fn tree_seed(&self, tree: usize) -> u64 {
        self.config
            .seed
            .wrapping_add((tree as u64).wrapping_add(1).wrapping_mul(SEED_STRIDE))
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[String]) -> Result<(), FitError> {
        if features.is_empty() {
            return Err(FitError::Empty);
        }
        if features.len() != labels.len() {
            return Err(FitError::LengthMismatch {
                features: features.len(),
                labels: labels.len(),
            });
        }
        let n_features = features[0].len();
        if let Some(row) = features.iter().position(|f| f.len() != n_features) {
            return Err(FitError::RaggedFeatures {
                row,
                expected: n_features,
                found: features[row].len(),
            });
        }
        if self.config.n_trees == 0 {
            return Err(FitError::NoTrees);
        }

        let mut classes: Vec<String> = labels.to_vec();
        classes.sort();
        classes.dedup();
        let encoded: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or(0))
            .collect();

        let max_features = self
            .config
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().round() as usize)
            .clamp(1, n_features.max(1));

        let n = features.len();
        let mut trees = Vec::with_capacity(self.config.n_trees);
        for t in 0..self.config.n_trees {
            let mut rng = StdRng::seed_from_u64(self.tree_seed(t));
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let builder = TreeBuilder {
                features,
                labels: &encoded,
                n_classes: classes.len(),
                max_features,
                config: &self.config,
                rng,
                nodes: Vec::new(),
            };
            trees.push(builder.build(bootstrap));
        }

        self.classes = classes;
        self.n_features = n_features;
        self.trees = trees;
        Ok(())
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        if self.trees.is_empty() {
            return vec![0.0; self.classes.len()];
        }
        let mut summed = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in summed.iter_mut().zip(tree.distribution(features)) {
                *acc += p;
            }
        }
        let total: f64 = summed.iter().sum();
        if total > 0.0 {
            summed.iter_mut().for_each(|p| *p /= total);
        }
        summed
    }
}
