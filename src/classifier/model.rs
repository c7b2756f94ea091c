//! Trained importance model
//!
//! A bagged ensemble of decision trees over the extracted feature rows.
//! Class imbalance is handled by balanced bootstrap sampling: each draw
//! picks a class uniformly and then a uniform member of that class, so a
//! lopsided evidence set does not drown out the minority label. Training is
//! seeded and fully deterministic.

use crate::classifier::features::FEATURE_DIM;
use crate::error::{Result, TriageError};
use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Ensemble hyperparameters
#[derive(Debug, Clone, Copy)]
pub struct ModelParams {
    pub trees: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            trees: 50,
            max_depth: 10,
            seed: 42,
        }
    }
}

/// Binary importance classifier: an ensemble of bagged decision trees
///
/// Label convention: class 1 = important, class 0 = not important.
#[derive(Serialize, Deserialize)]
pub struct ImportanceModel {
    trees: Vec<DecisionTree<f64, usize>>,
}

impl ImportanceModel {
    /// Fit the ensemble on one feature row per labeled example
    ///
    /// Requires at least two rows; the caller enforces the evidence
    /// minimum before getting here.
    pub fn fit(rows: &Array2<f64>, labels: &[bool], params: ModelParams) -> Result<Self> {
        let n = rows.nrows();
        if n < 2 || labels.len() != n {
            return Err(TriageError::Training(format!(
                "need at least 2 feature rows, got {}",
                n
            )));
        }

        let important: Vec<usize> = (0..n).filter(|&i| labels[i]).collect();
        let unimportant: Vec<usize> = (0..n).filter(|&i| !labels[i]).collect();

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.trees);

        for _ in 0..params.trees {
            let sample = balanced_bootstrap(&important, &unimportant, n, &mut rng);

            let x = Array2::from_shape_fn((sample.len(), rows.ncols()), |(i, j)| {
                rows[[sample[i], j]]
            });
            let y = Array1::from_iter(sample.iter().map(|&i| usize::from(labels[i])));

            let dataset = Dataset::new(x, y);
            let tree = DecisionTree::params()
                .split_quality(SplitQuality::Gini)
                .max_depth(Some(params.max_depth))
                .fit(&dataset)
                .map_err(|e| TriageError::Training(e.to_string()))?;
            trees.push(tree);
        }

        Ok(Self { trees })
    }

    /// Predict one feature vector, returning the label and the maximum
    /// class probability
    pub fn predict(&self, features: &[f64; FEATURE_DIM]) -> (bool, f64) {
        let x = Array2::from_shape_fn((1, FEATURE_DIM), |(_, j)| features[j]);

        let votes_important = self
            .trees
            .iter()
            .filter(|tree| tree.predict(&x)[0] == 1)
            .count();

        let p_important = votes_important as f64 / self.trees.len() as f64;
        let is_important = p_important > 0.5;
        (is_important, p_important.max(1.0 - p_important))
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

/// Draw `n` indices, alternating uniformly between the two classes
///
/// Falls back to plain bootstrap over the populated class when the other
/// one is empty.
fn balanced_bootstrap(
    important: &[usize],
    unimportant: &[usize],
    n: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let mut sample = Vec::with_capacity(n);
    for _ in 0..n {
        let pool = if important.is_empty() {
            unimportant
        } else if unimportant.is_empty() {
            important
        } else if rng.gen_bool(0.5) {
            important
        } else {
            unimportant
        };
        sample.push(pool[rng.gen_range(0..pool.len())]);
    }
    sample
}
