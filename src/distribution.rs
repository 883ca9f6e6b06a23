//! `TargetDistribution` / `CurrentDistribution` (§3) and the 1-D Wasserstein
//! distance used to detect convergence (§4.C6 step 5).

use crate::error::{Result, SynthError};
use serde::{Deserialize, Serialize};

/// A named distribution family clipped to `[min_cost, max_cost]` (§4.C6
/// Initialization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionFamily {
    Uniform,
    Normal,
    Exponential,
}

/// How the target counts-per-bucket were derived; kept for `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DistributionSource {
    Family(DistributionFamily),
    UserSample,
    Explicit,
}

/// Equal-width bucketing of `[min_cost, max_cost]` into `num_intervals`
/// buckets, shared by target and current distributions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketLayout {
    pub min_cost: f64,
    pub max_cost: f64,
    pub num_intervals: usize,
}

impl BucketLayout {
    pub fn new(min_cost: f64, max_cost: f64, num_intervals: usize) -> Result<Self> {
        if min_cost >= max_cost {
            return Err(SynthError::InvalidDistribution(format!(
                "min_cost ({min_cost}) must be < max_cost ({max_cost})"
            )));
        }
        if num_intervals == 0 {
            return Err(SynthError::InvalidDistribution(
                "num_intervals must be positive".to_string(),
            ));
        }
        Ok(Self { min_cost, max_cost, num_intervals })
    }

    pub fn width(&self) -> f64 {
        (self.max_cost - self.min_cost) / self.num_intervals as f64
    }

    pub fn bounds(&self, bucket: usize) -> (f64, f64) {
        let w = self.width();
        (self.min_cost + w * bucket as f64, self.min_cost + w * (bucket as f64 + 1.0))
    }

    pub fn midpoint(&self, bucket: usize) -> f64 {
        let (lo, hi) = self.bounds(bucket);
        (lo + hi) / 2.0
    }

    /// Bucket index a scalar cost falls into, clamped to the layout's range.
    /// `max_cost` itself is placed in the last bucket.
    pub fn bucket_of(&self, cost: f64) -> Option<usize> {
        if cost < self.min_cost || cost > self.max_cost {
            return None;
        }
        let w = self.width();
        if w <= 0.0 {
            return Some(0);
        }
        let idx = ((cost - self.min_cost) / w).floor() as usize;
        Some(idx.min(self.num_intervals - 1))
    }
}

/// Fixed vector of length N summing to `total_sqls` (§3 TargetDistribution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDistribution {
    pub layout: BucketLayout,
    pub counts: Vec<u64>,
    pub source: DistributionSource,
}

impl TargetDistribution {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Named-family generation, clipped to the layout's range (§4.C6 Init).
    pub fn from_family(
        layout: BucketLayout,
        family: DistributionFamily,
        total_sqls: u64,
    ) -> Self {
        let n = layout.num_intervals;
        let mut weights = vec![0.0; n];
        match family {
            DistributionFamily::Uniform => {
                weights.iter_mut().for_each(|w| *w = 1.0);
            }
            DistributionFamily::Normal => {
                let mean = (layout.min_cost + layout.max_cost) / 2.0;
                let std = (layout.max_cost - layout.min_cost) / 6.0_f64.max(1e-9);
                for (i, w) in weights.iter_mut().enumerate() {
                    let mid = layout.midpoint(i);
                    let z = (mid - mean) / std.max(1e-9);
                    *w = (-0.5 * z * z).exp();
                }
            }
            DistributionFamily::Exponential => {
                let span = (layout.max_cost - layout.min_cost).max(1e-9);
                for (i, w) in weights.iter_mut().enumerate() {
                    let mid = layout.midpoint(i) - layout.min_cost;
                    *w = (-3.0 * mid / span).exp();
                }
            }
        }
        let counts = largest_remainder_allocation(&weights, total_sqls);
        Self { layout, counts, source: DistributionSource::Family(family) }
    }

    /// Bin a user-provided cost sample over the sample's own min/max, then
    /// translate bin proportions into counts on the target layout via
    /// largest-remainder correction so counts sum exactly to `total_sqls`
    /// (§4.C6 Init).
    pub fn from_user_sample(layout: BucketLayout, sample: &[f64], total_sqls: u64) -> Result<Self> {
        if sample.is_empty() {
            return Err(SynthError::InvalidDistribution("user sample is empty".to_string()));
        }
        let sample_min = sample.iter().cloned().fold(f64::INFINITY, f64::min);
        let sample_max = sample.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let sample_layout = BucketLayout::new(
            sample_min,
            if sample_max > sample_min { sample_max } else { sample_min + 1.0 },
            layout.num_intervals,
        )?;
        let mut weights = vec![0.0; layout.num_intervals];
        for &v in sample {
            if let Some(idx) = sample_layout.bucket_of(v) {
                weights[idx] += 1.0;
            }
        }
        let counts = largest_remainder_allocation(&weights, total_sqls);
        Ok(Self { layout, counts, source: DistributionSource::UserSample })
    }

    pub fn from_explicit(layout: BucketLayout, counts: Vec<u64>) -> Result<Self> {
        if counts.len() != layout.num_intervals {
            return Err(SynthError::InvalidDistribution(format!(
                "explicit counts length {} != num_intervals {}",
                counts.len(),
                layout.num_intervals
            )));
        }
        Ok(Self { layout, counts, source: DistributionSource::Explicit })
    }
}

/// Largest-remainder apportionment of `total` across buckets proportional to
/// `weights`, guaranteeing the output sums exactly to `total`.
fn largest_remainder_allocation(weights: &[f64], total: u64) -> Vec<u64> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 || total == 0 {
        return vec![0; weights.len()];
    }
    let exact: Vec<f64> = weights.iter().map(|w| w / sum * total as f64).collect();
    let mut floors: Vec<u64> = exact.iter().map(|v| v.floor() as u64).collect();
    let allocated: u64 = floors.iter().sum();
    let mut remainder = total.saturating_sub(allocated);
    let mut fracs: Vec<(usize, f64)> =
        exact.iter().enumerate().map(|(i, v)| (i, v.fract())).collect();
    fracs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (idx, _) in fracs {
        if remainder == 0 {
            break;
        }
        floors[idx] += 1;
        remainder -= 1;
    }
    floors
}

/// Mutable accumulator of per-bucket counts (§3 CurrentDistribution).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentDistribution {
    pub counts: Vec<u64>,
}

impl CurrentDistribution {
    pub fn zeros(num_intervals: usize) -> Self {
        Self { counts: vec![0; num_intervals] }
    }

    pub fn add(&mut self, bucket: usize) {
        if let Some(c) = self.counts.get_mut(bucket) {
            *c += 1;
        }
    }

    /// Clamp to `target` for distance-computation purposes (§3 invariant,
    /// §8 "current[i] <= target[i] when computed for distance").
    pub fn clamped_to(&self, target: &TargetDistribution) -> Vec<u64> {
        self.counts
            .iter()
            .zip(target.counts.iter())
            .map(|(&c, &t)| c.min(t))
            .collect()
    }

    pub fn gap(&self, target: &TargetDistribution, bucket: usize) -> i64 {
        target.counts[bucket] as i64 - self.counts[bucket] as i64
    }
}

/// 1-D Wasserstein distance between two equal-length count vectors,
/// expanded to midpoint-repeated samples per the layout (§4.C6 "Distance
/// metric"). For discrete equal-length samples the Wasserstein-1 distance
/// reduces to the mean absolute difference of sorted samples; we pad the
/// shorter sample list with its own last value is wrong in general, so
/// instead we use the standard order-statistics formula over the two
/// empirical CDFs, which handles unequal sample counts correctly.
pub fn wasserstein_distance(target: &TargetDistribution, current_counts: &[u64]) -> f64 {
    let layout = &target.layout;
    let mut target_samples = Vec::new();
    let mut current_samples = Vec::new();
    for i in 0..layout.num_intervals {
        let mid = layout.midpoint(i);
        for _ in 0..target.counts[i] {
            target_samples.push(mid);
        }
        for _ in 0..current_counts[i] {
            current_samples.push(mid);
        }
    }
    if target_samples.is_empty() {
        target_samples.push(0.0);
    }
    if current_samples.is_empty() {
        current_samples.push(0.0);
    }
    wasserstein_1d(&target_samples, &current_samples)
}

/// Wasserstein-1 distance between two (possibly differently-sized) 1-D
/// empirical samples, via the all-values-sorted/CDF-step-function formula
/// scipy's `wasserstein_distance` uses.
fn wasserstein_1d(a: &[f64], b: &[f64]) -> f64 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(|x, y| x.partial_cmp(y).unwrap());
    b.sort_by(|x, y| x.partial_cmp(y).unwrap());

    let mut all_values: Vec<f64> = a.iter().chain(b.iter()).cloned().collect();
    all_values.sort_by(|x, y| x.partial_cmp(y).unwrap());
    all_values.dedup_by(|x, y| (*x - *y).abs() < 1e-12);

    if all_values.len() < 2 {
        return 0.0;
    }

    let cdf = |sorted: &[f64], v: f64| -> f64 {
        let count = sorted.partition_point(|&x| x <= v);
        count as f64 / sorted.len() as f64
    };

    let mut distance = 0.0;
    for w in all_values.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        let delta = hi - lo;
        let cdf_a = cdf(&a, lo);
        let cdf_b = cdf(&b, lo);
        distance += (cdf_a - cdf_b).abs() * delta;
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_cost_ge_max_cost_is_fatal() {
        let err = BucketLayout::new(10.0, 10.0, 4).unwrap_err();
        assert!(matches!(err, SynthError::InvalidDistribution(_)));
    }

    #[test]
    fn largest_remainder_sums_to_total() {
        let weights = vec![1.0, 1.0, 1.0];
        let counts = largest_remainder_allocation(&weights, 10);
        assert_eq!(counts.iter().sum::<u64>(), 10);
    }

    #[test]
    fn uniform_family_sums_to_total_sqls() {
        let layout = BucketLayout::new(0.0, 100.0, 4).unwrap();
        let target = TargetDistribution::from_family(layout, DistributionFamily::Uniform, 20);
        assert_eq!(target.total(), 20);
        assert_eq!(target.counts.len(), 4);
    }

    #[test]
    fn explicit_length_mismatch_is_fatal() {
        let layout = BucketLayout::new(0.0, 100.0, 4).unwrap();
        let err = TargetDistribution::from_explicit(layout, vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, SynthError::InvalidDistribution(_)));
    }

    #[test]
    fn bucket_of_places_max_cost_in_last_bucket() {
        let layout = BucketLayout::new(0.0, 100.0, 4).unwrap();
        assert_eq!(layout.bucket_of(100.0), Some(3));
        assert_eq!(layout.bucket_of(0.0), Some(0));
        assert_eq!(layout.bucket_of(-1.0), None);
        assert_eq!(layout.bucket_of(25.0), Some(1));
    }

    #[test]
    fn wasserstein_zero_for_identical_distributions() {
        let layout = BucketLayout::new(0.0, 100.0, 4).unwrap();
        let target = TargetDistribution::from_explicit(layout, vec![2, 2, 2, 2]).unwrap();
        let d = wasserstein_distance(&target, &[2, 2, 2, 2]);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn wasserstein_positive_when_distributions_differ() {
        let layout = BucketLayout::new(0.0, 100.0, 4).unwrap();
        let target = TargetDistribution::from_explicit(layout, vec![4, 0, 0, 0]).unwrap();
        let d = wasserstein_distance(&target, &[0, 0, 0, 4]);
        assert!(d > 0.0);
    }

    #[test]
    fn clamped_to_never_exceeds_target() {
        let layout = BucketLayout::new(0.0, 100.0, 2).unwrap();
        let target = TargetDistribution::from_explicit(layout, vec![2, 2]).unwrap();
        let mut current = CurrentDistribution::zeros(2);
        current.counts = vec![5, 1];
        let clamped = current.clamped_to(&target);
        assert_eq!(clamped, vec![2, 1]);
    }
}
