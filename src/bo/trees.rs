//! Bagged regression-tree surrogate used by the predicate enumerator's
//! Bayesian optimizer (§4.C3 "Optimizer"). Adapted directly from
//! `rusty_db::ml::algorithms::trees::{DecisionTree, RandomForest}`'s CART
//! split search and bootstrap aggregation, retargeted at the ordinal-index
//! encoded categorical features this crate's search space produces — a
//! purpose-built swap for the reference implementation's SMAC facade, since
//! no external ML crate is in the teacher's stack and an EI-over-a-forest
//! surrogate is the one genuinely new numeric kernel this crate needs.

use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf { mean: f64, variance: f64 },
    Split { feature: usize, threshold: f64, left: Box<TreeNode>, right: Box<TreeNode> },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    root: TreeNode,
}

impl RegressionTree {
    fn fit(features: &[Vec<f64>], targets: &[f64], max_depth: usize, min_samples_leaf: usize) -> Self {
        let indices: Vec<usize> = (0..features.len()).collect();
        let root = Self::build(features, targets, &indices, 0, max_depth, min_samples_leaf);
        Self { root }
    }

    fn build(
        features: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        depth: usize,
        max_depth: usize,
        min_samples_leaf: usize,
    ) -> TreeNode {
        if indices.len() < 2 * min_samples_leaf || depth >= max_depth {
            return Self::leaf(targets, indices);
        }
        match Self::best_split(features, targets, indices, min_samples_leaf) {
            Some((feature, threshold, left, right)) => {
                let left_node = Self::build(features, targets, &left, depth + 1, max_depth, min_samples_leaf);
                let right_node = Self::build(features, targets, &right, depth + 1, max_depth, min_samples_leaf);
                TreeNode::Split {
                    feature,
                    threshold,
                    left: Box::new(left_node),
                    right: Box::new(right_node),
                }
            }
            None => Self::leaf(targets, indices),
        }
    }

    fn leaf(targets: &[f64], indices: &[usize]) -> TreeNode {
        let n = indices.len().max(1) as f64;
        let mean = indices.iter().map(|&i| targets[i]).sum::<f64>() / n;
        let variance = indices.iter().map(|&i| (targets[i] - mean).powi(2)).sum::<f64>() / n;
        TreeNode::Leaf { mean, variance: variance.max(1e-6) }
    }

    fn variance_of(targets: &[f64], indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        let n = indices.len() as f64;
        let mean = indices.iter().map(|&i| targets[i]).sum::<f64>() / n;
        indices.iter().map(|&i| (targets[i] - mean).powi(2)).sum::<f64>() / n
    }

    fn best_split(
        features: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        min_samples_leaf: usize,
    ) -> Option<(usize, f64, Vec<usize>, Vec<usize>)> {
        let n_features = features[0].len();
        let parent_var = Self::variance_of(targets, indices);
        let mut best: Option<(f64, usize, f64, Vec<usize>, Vec<usize>)> = None;

        for feature_idx in 0..n_features {
            let mut values: Vec<f64> = indices.iter().map(|&i| features[i][feature_idx]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            values.dedup();

            for &threshold in &values {
                let (left, right): (Vec<usize>, Vec<usize>) = indices
                    .iter()
                    .partition(|&&i| features[i][feature_idx] <= threshold);
                if left.len() < min_samples_leaf || right.len() < min_samples_leaf {
                    continue;
                }
                let n_left = left.len() as f64;
                let n_right = right.len() as f64;
                let n_total = indices.len() as f64;
                let gain = parent_var
                    - (n_left / n_total) * Self::variance_of(targets, &left)
                    - (n_right / n_total) * Self::variance_of(targets, &right);
                if gain > best.as_ref().map(|b| b.0).unwrap_or(0.0) {
                    best = Some((gain, feature_idx, threshold, left, right));
                }
            }
        }
        best.map(|(_, f, t, l, r)| (f, t, l, r))
    }

    fn predict(&self, sample: &[f64]) -> (f64, f64) {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { mean, variance } => return (*mean, *variance),
                TreeNode::Split { feature, threshold, left, right } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Bagged ensemble of `RegressionTree`s; predicts a mean and a
/// between-trees variance used as the EI acquisition's uncertainty term.
#[derive(Debug, Clone)]
pub struct ForestSurrogate {
    trees: Vec<RegressionTree>,
}

impl ForestSurrogate {
    pub fn fit(features: &[Vec<f64>], targets: &[f64], n_estimators: usize, rng: &mut impl Rng) -> Self {
        let n = features.len();
        let max_depth = 6;
        let min_samples_leaf = 1.max(n / 10);
        let mut trees = Vec::with_capacity(n_estimators);
        for _ in 0..n_estimators {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
            let boot_features: Vec<Vec<f64>> = bootstrap.iter().map(|&i| features[i].clone()).collect();
            let boot_targets: Vec<f64> = bootstrap.iter().map(|&i| targets[i]).collect();
            trees.push(RegressionTree::fit(&boot_features, &boot_targets, max_depth, min_samples_leaf));
        }
        Self { trees }
    }

    /// Mean prediction and across-tree variance (epistemic uncertainty) for
    /// one candidate.
    pub fn predict(&self, sample: &[f64]) -> (f64, f64) {
        let preds: Vec<f64> = self.trees.iter().map(|t| t.predict(sample).0).collect();
        let mean = preds.iter().sum::<f64>() / preds.len().max(1) as f64;
        let variance = if preds.len() > 1 {
            preds.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / preds.len() as f64
        } else {
            self.trees.first().map(|t| t.predict(sample).1).unwrap_or(1e-6)
        };
        (mean, variance.max(1e-9))
    }
}

/// Expected Improvement for minimization: `E[max(best - f(x), 0)]` under a
/// Gaussian approximation `N(mean, std)` from the forest's across-tree
/// spread (§4.C3 "Optimizer").
pub fn expected_improvement(mean: f64, variance: f64, best_so_far: f64) -> f64 {
    let std = variance.sqrt().max(1e-9);
    let z = (best_so_far - mean) / std;
    let improvement = best_so_far - mean;
    improvement * normal_cdf(z) + std * normal_pdf(z)
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz-Stegun rational approximation of the error function, accurate
/// to ~1.5e-7 — sufficient for an acquisition-function ranking heuristic.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// One-hot/ordinal-index encoding of a categorical config: each
/// hyperparameter contributes its chosen domain index as a single feature
/// column.
pub fn encode(config: &HashMap<String, usize>, keys: &[String]) -> Vec<f64> {
    keys.iter().map(|k| *config.get(k).unwrap_or(&0) as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forest_fits_a_linear_relationship_reasonably() {
        let mut rng = rand::rng();
        let features: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..30).map(|i| i as f64 * 2.0).collect();
        let forest = ForestSurrogate::fit(&features, &targets, 10, &mut rng);
        let (mean, _) = forest.predict(&[10.0]);
        assert!((mean - 20.0).abs() < 8.0);
    }

    #[test]
    fn expected_improvement_is_nonnegative() {
        let ei = expected_improvement(0.5, 0.1, 0.3);
        assert!(ei >= 0.0);
    }

    #[test]
    fn expected_improvement_favors_lower_mean_given_equal_variance() {
        let better = expected_improvement(0.1, 0.05, 0.5);
        let worse = expected_improvement(0.4, 0.05, 0.5);
        assert!(better > worse);
    }

    #[test]
    fn encode_maps_missing_keys_to_zero() {
        let mut config = HashMap::new();
        config.insert("a".to_string(), 3usize);
        let encoded = encode(&config, &["a".to_string(), "b".to_string()]);
        assert_eq!(encoded, vec![3.0, 0.0]);
    }
}
