//! C6: DistributionController — the outer loop driving `current` toward
//! `target` by repeatedly re-searching the most underfilled bucket's
//! best-scoring templates (§4.C6).

use crate::bo::{self, OptimizeRequest, SeedPoint, Target};
use crate::catalog::ColumnCatalog;
use crate::cost::{CostMetric, DbConnector};
use crate::distribution::{wasserstein_distance, CurrentDistribution, TargetDistribution};
use crate::history::TemplateRunHistory;
use crate::llm::LlmClient;
use crate::refiner;
use crate::template::generator::{SchemaInfo, TemplateGenerator};
use crate::template::store::TemplateStore;
use crate::util::weighted_sample_without_replacement;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Thresholds and retry budgets the controller is tuned by (§9 Open
/// Question (c): both are config-exposed rather than hardcoded).
#[derive(Debug, Clone, Copy)]
pub struct ControllerPolicy {
    /// Fraction of `total_sqls` spent on initial per-template profiling
    /// (§4.C6 Init).
    pub profiling_fraction: f64,
    /// Refinement-pass iterations over plainly-undercovered buckets
    /// (§4.C6 step 3).
    pub main_refine_iterations: u32,
    /// Additional refinement-pass iterations over "difficult" buckets
    /// (coverage below `difficult_coverage_threshold`).
    pub difficult_refine_iterations: u32,
    pub difficult_coverage_threshold: f64,
    /// `useful / new < bad_combination_ratio` marks `(bucket, template)` bad.
    pub bad_combination_ratio: f64,
    /// A template is skipped for a bucket when its historical costs have at
    /// most this many distinct values, none within the bucket's range.
    pub limited_diversity_bound: usize,
    /// Consecutive no-improvement selections before a bucket is declared
    /// missing.
    pub bucket_failure_limit: u32,
    pub max_candidates_per_iteration: usize,
    pub wall_clock_budget: Duration,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            profiling_fraction: 0.15,
            main_refine_iterations: 3,
            difficult_refine_iterations: 5,
            difficult_coverage_threshold: 0.10,
            bad_combination_ratio: 0.05,
            limited_diversity_bound: 3,
            bucket_failure_limit: 5,
            max_candidates_per_iteration: 10,
            wall_clock_budget: Duration::from_secs(3600),
        }
    }
}

/// "Closeness" ranking score for a template against a bucket's range:
/// `base · variety`, where `base = 1 / (1 + avg_dist)` rewards costs that
/// sit inside or near `[l, r]`, and `variety` rewards templates that have
/// produced many distinct costs rather than repeating the same one
/// (§4.C6.b "Template ranking").
pub fn closeness_score(costs: &[f64], l: f64, r: f64) -> f64 {
    if costs.is_empty() {
        return 0.0;
    }
    let avg_dist: f64 =
        costs.iter().map(|&c| (l - c).max(0.0) + (c - r).max(0.0)).sum::<f64>() / costs.len() as f64;
    let base = 1.0 / (1.0 + avg_dist);
    let distinct: HashSet<u64> = costs.iter().map(|c| c.to_bits()).collect();
    let variety = distinct.len() as f64 / costs.len() as f64;
    base * variety
}

/// A template is of "limited diversity" for a bucket when it has produced
/// few distinct costs and none of them land in `[l, r]` — re-searching it
/// is unlikely to help (§4.C6.b).
pub fn limited_diversity(costs: &[f64], l: f64, r: f64, bound: usize) -> bool {
    let distinct: HashSet<u64> = costs.iter().map(|c| c.to_bits()).collect();
    distinct.len() <= bound && !distinct.iter().any(|&bits| {
        let v = f64::from_bits(bits);
        v >= l && v <= r
    })
}

fn history_path(dir: &Path, template_id: u64, metric: &CostMetric) -> PathBuf {
    dir.join(format!("history_{}_{}.json", template_id, metric.name()))
}

/// Final state returned once the main loop exits (wall-clock budget, every
/// bucket stalled, or the loop ran `num_iterations` times).
pub struct ControllerOutcome {
    pub current: CurrentDistribution,
    pub bad: HashSet<(usize, u64)>,
    pub missing: HashSet<usize>,
    pub remaining_space: HashMap<u64, u64>,
    pub wasserstein_history: Vec<f64>,
}

/// Run the full C6 algorithm end to end: generate templates (C5), profile
/// them, run the refinement pass (C7), then iterate on the most underfilled
/// bucket until convergence, the iteration budget, or the wall-clock budget
/// is spent (§4.C6 steps 1-5).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    target: &TargetDistribution,
    catalog: &ColumnCatalog,
    db: &dyn DbConnector,
    llm: &dyn LlmClient,
    metric: &CostMetric,
    generator: &dyn TemplateGenerator,
    schema: &SchemaInfo,
    store: &mut TemplateStore,
    histories: &mut HashMap<u64, TemplateRunHistory>,
    history_dir: &Path,
    policy: &ControllerPolicy,
    num_iterations: u32,
    rng: &mut impl Rng,
) -> crate::error::Result<ControllerOutcome> {
    let start = Instant::now();
    let n = target.layout.num_intervals;
    let mut current = CurrentDistribution::zeros(n);
    let mut bad: HashSet<(usize, u64)> = HashSet::new();
    let mut remaining_space: HashMap<u64, u64> = HashMap::new();
    let mut selected_times = vec![0u32; n];
    let mut missing: HashSet<usize> = HashSet::new();
    let mut wasserstein_hist: Vec<f64> = Vec::new();

    // Step 1: generate templates (§4.C5) and register them.
    let generated = generator.generate(catalog, schema).await?;
    for template in generated {
        let id = store.add(template)?;
        histories.insert(id, TemplateRunHistory::new());
    }

    // Step 2: initial profiling — a fixed, small per-template budget whose
    // total is `profiling_fraction` of `total_sqls` (§4.C6 Init).
    let num_profiling =
        ((target.total() as f64) * policy.profiling_fraction / store.len().max(1) as f64).ceil() as usize;
    let ids: Vec<u64> = store.list().map(|t| t.template_id).collect();
    for id in ids {
        let Some(template) = store.get(id).cloned() else { continue };
        let mut history = histories.remove(&id).unwrap_or_default();
        let request = OptimizeRequest::initial_profiling(num_profiling);
        let outcome = bo::optimize(
            &template,
            catalog,
            Target::Range(target.layout.min_cost, target.layout.max_cost),
            db,
            metric,
            request,
            Vec::new(),
            &mut history,
            rng,
        )
        .await;
        remaining_space.insert(id, outcome.remaining_space_size);
        for scalar in history.scalar_costs() {
            if let Some(bucket) = target.layout.bucket_of(scalar) {
                current.add(bucket);
            }
        }
        history.persist(history_path(history_dir, id, metric))?;
        histories.insert(id, history);
    }

    // Templates whose profiling produced zero usable costs can never
    // contribute and are dropped (§9 Open Question (b)).
    let doomed: Vec<u64> = histories
        .iter()
        .filter(|(_, h)| h.scalar_costs().is_empty())
        .map(|(id, _)| *id)
        .collect();
    for id in &doomed {
        histories.remove(id);
        remaining_space.remove(id);
    }
    store.prune(|t| !doomed.contains(&t.template_id))?;

    // Step 3: refinement pass over undercovered, then difficult, buckets.
    refiner::run_refinement_pass(
        histories,
        store,
        target,
        catalog,
        db,
        metric,
        llm,
        history_dir,
        &mut current,
        policy,
        rng,
    )
    .await?;

    // Step 4: main iterative loop.
    for _ in 0..num_iterations {
        if start.elapsed() > policy.wall_clock_budget {
            tracing::warn!("wall-clock budget exhausted, stopping main loop");
            break;
        }

        // a. find the most underfilled bucket not already given up on.
        let mut best_bucket: Option<usize> = None;
        let mut best_gap: i64 = 0;
        for i in 0..n {
            if missing.contains(&i) {
                continue;
            }
            let gap = current.gap(target, i);
            if gap > best_gap {
                best_gap = gap;
                best_bucket = Some(i);
            }
        }
        let Some(i_star) = best_bucket else {
            tracing::info!("every bucket has reached its target, stopping");
            break;
        };
        let gap = best_gap as usize;
        let (l, r) = target.layout.bounds(i_star);

        // b. rank candidate templates by closeness score, skipping bad
        // combinations and templates with too little remaining search space.
        let ids: Vec<u64> = store.list().map(|t| t.template_id).collect();
        let mut candidates: Vec<(u64, f64)> = Vec::new();
        for id in &ids {
            if bad.contains(&(i_star, *id)) {
                continue;
            }
            let space = remaining_space.get(id).copied().unwrap_or(0);
            if space < (5 * gap) as u64 {
                continue;
            }
            let Some(history) = histories.get(id) else { continue };
            let costs = history.scalar_costs();
            if costs.is_empty() || limited_diversity(&costs, l, r, policy.limited_diversity_bound) {
                continue;
            }
            candidates.push((*id, closeness_score(&costs, l, r)));
        }

        if candidates.is_empty() {
            selected_times[i_star] += 1;
            if selected_times[i_star] >= policy.bucket_failure_limit {
                missing.insert(i_star);
            }
            continue;
        }

        let selected: Vec<u64> = if candidates.len() > policy.max_candidates_per_iteration {
            weighted_sample_without_replacement(&candidates, policy.max_candidates_per_iteration, |(_, s)| *s, rng)
                .into_iter()
                .map(|(id, _)| *id)
                .collect()
        } else {
            candidates.iter().map(|(id, _)| *id).collect()
        };

        // c. re-search each selected template targeted at [l, r].
        let mut any_improved = false;
        for id in selected {
            let Some(template) = store.get(id).cloned() else { continue };
            let mut history = histories.remove(&id).unwrap_or_default();
            let target_obj = Target::Range(l, r);

            let space = bo::SearchSpace::build(&template, catalog);
            let seeds: Vec<SeedPoint> = bo::reuse_history(&space, target_obj, &[&history]);

            let mut running = current.counts.clone();
            let trials = 5 * gap.max(1);
            let n_init = ((gap.max(1) as f64) * 0.5).floor() as usize;
            let request = OptimizeRequest::targeted(trials, n_init);
            let before_len = history.len();
            let outcome =
                bo::optimize(&template, catalog, target_obj, db, metric, request, seeds, &mut history, rng).await;
            remaining_space.insert(id, outcome.remaining_space_size);

            let new_trials: Vec<_> = history.trials_in_order().skip(before_len).cloned().collect();
            let mut useful = 0usize;
            for trial in &new_trials {
                if let Some(scalar) = trial.scalar_cost {
                    if let Some(bucket) = target.layout.bucket_of(scalar) {
                        current.add(bucket);
                        if running[bucket] < target.counts[bucket] {
                            useful += 1;
                            if bucket == i_star {
                                any_improved = true;
                            }
                        }
                        running[bucket] += 1;
                    }
                }
            }
            if !new_trials.is_empty()
                && (useful as f64 / new_trials.len() as f64) < policy.bad_combination_ratio
            {
                bad.insert((i_star, id));
            }
            history.persist(history_path(history_dir, id, metric))?;
            histories.insert(id, history);
        }

        if !any_improved {
            selected_times[i_star] += 1;
            if selected_times[i_star] >= policy.bucket_failure_limit {
                missing.insert(i_star);
            }
        }

        // d. convergence check: distance flatlines across the last 3 rounds.
        let w = wasserstein_distance(target, &current.clamped_to(target));
        wasserstein_hist.push(w);
        if wasserstein_hist.len() >= 3 {
            let tail = &wasserstein_hist[wasserstein_hist.len() - 3..];
            if (tail[0] - tail[1]).abs() < 1e-9 && (tail[1] - tail[2]).abs() < 1e-9 {
                tracing::info!(distance = w, "distribution distance has flatlined, stopping");
                break;
            }
        }
    }

    Ok(ControllerOutcome { current, bad, missing, remaining_space, wasserstein_history: wasserstein_hist })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closeness_score_rewards_costs_inside_range() {
        let inside = closeness_score(&[10.0, 12.0, 15.0], 10.0, 20.0);
        let outside = closeness_score(&[100.0, 120.0, 150.0], 10.0, 20.0);
        assert!(inside > outside);
    }

    #[test]
    fn closeness_score_rewards_variety() {
        let varied = closeness_score(&[10.0, 12.0, 15.0], 10.0, 20.0);
        let repeated = closeness_score(&[10.0, 10.0, 10.0], 10.0, 20.0);
        assert!(varied > repeated);
    }

    #[test]
    fn limited_diversity_true_when_few_distinct_and_none_in_range() {
        assert!(limited_diversity(&[100.0, 100.0, 100.0], 10.0, 20.0, 3));
        assert!(!limited_diversity(&[100.0, 15.0, 100.0], 10.0, 20.0, 3));
    }

    #[test]
    fn default_policy_matches_spec_thresholds() {
        let policy = ControllerPolicy::default();
        assert_eq!(policy.main_refine_iterations, 3);
        assert_eq!(policy.difficult_refine_iterations, 5);
        assert!((policy.bad_combination_ratio - 0.05).abs() < 1e-9);
    }
}
