//! Seeded stratified train/test split

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Row indices of each partition, ascending
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partition row indices so each side keeps the per-class proportions.
///
/// Each class contributes `round(len * test_ratio)` rows to the test side,
/// capped so at least one row stays in training. Classes are visited in
/// label order and shuffled with a generator seeded once from `seed`.
pub fn stratified_split(labels: &[String], test_ratio: f64, seed: u64) -> Split {
    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(label.as_str()).or_default().push(i);
    }

    let ratio = test_ratio.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::with_capacity(labels.len()),
        test: Vec::new(),
    };

    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64 * ratio).round() as usize).min(indices.len() - 1);
        split.test.extend_from_slice(&indices[..n_test]);
        split.train.extend_from_slice(&indices[n_test..]);
    }

    split.train.sort_unstable();
    split.test.sort_unstable();
    split
}
