//! C3: PredicateEnumerator — per-template Bayesian optimization over
//! placeholder values, driving an instantiated cost toward a target
//! bucket (§4.C3).

pub mod trees;

use crate::catalog::ColumnCatalog;
use crate::cost::{CostMetric, DbConnector};
use crate::history::{CostReducer, TemplateRunHistory, TrialRecord};
use crate::model::{ColumnValue, SqlTemplate};
use crate::template;
use rand::Rng;
use std::collections::HashMap;

/// One ordinal hyperparameter: the placeholder's ordered, deduplicated
/// value domain (§4.C3 "Search space").
#[derive(Debug, Clone)]
pub struct HyperParam {
    pub table: String,
    pub raw_column: String,
    pub domain: Vec<ColumnValue>,
    pub is_range_start: bool,
    pub is_range_end: bool,
}

impl HyperParam {
    pub fn key(&self) -> String {
        format!("{}.{}", self.table, self.raw_column)
    }
}

/// A template's placeholder search space, resolved against the catalog.
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    pub params: Vec<HyperParam>,
}

impl SearchSpace {
    /// Build the search space from a template's placeholder tokens, per
    /// §4.C3 "Search space": skip placeholders whose column can't be
    /// resolved, and skip columns with an empty sample set.
    pub fn build(template: &SqlTemplate, catalog: &ColumnCatalog) -> Self {
        let mut params = Vec::new();
        for (table, raw_column) in SqlTemplate::parse_placeholders(&template.sql_text) {
            let Some((base_column, is_start, is_end)) =
                template::canonicalize_column(&table, &raw_column, catalog)
            else {
                continue;
            };
            let Some(sample) = catalog.lookup(&table, &base_column) else { continue };
            let domain = sample.ordered_domain();
            if domain.is_empty() {
                continue;
            }
            params.push(HyperParam {
                table,
                raw_column,
                domain,
                is_range_start: is_start,
                is_range_end: is_end,
            });
        }
        params.dedup_by(|a, b| a.table == b.table && a.raw_column == b.raw_column);
        Self { params }
    }

    /// Joint configuration-count upper bound: product of domain sizes.
    /// Saturates at `u64::MAX` instead of overflowing for wide templates.
    pub fn space_size(&self) -> u64 {
        self.params.iter().fold(1u64, |acc, p| acc.saturating_mul(p.domain.len() as u64))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn keys(&self) -> Vec<String> {
        self.params.iter().map(|p| p.key()).collect()
    }

    /// Render one candidate configuration (param key -> domain index) into
    /// a concrete SQL string, enforcing the range-pair invariant by
    /// coercing `(start, end)` to `(min, max)` after independent sampling
    /// (§4.C3 "Range-pair invariant").
    pub fn render_candidate(&self, template: &SqlTemplate, config: &HashMap<String, usize>) -> String {
        let mut values: HashMap<String, ColumnValue> = HashMap::new();
        for p in &self.params {
            let idx = *config.get(&p.key()).unwrap_or(&0);
            let idx = idx.min(p.domain.len().saturating_sub(1));
            values.insert(p.key(), p.domain[idx].clone());
        }

        // Coerce range pairs: start <= end under the numeric/insertion order
        // already baked into each side's own domain.
        let mut pair_bases: Vec<String> = Vec::new();
        for p in &self.params {
            if p.is_range_start {
                let base = p.raw_column.strip_suffix("_start").unwrap_or(&p.raw_column).to_string();
                pair_bases.push(format!("{}.{}", p.table, base));
            }
        }
        for base_key in pair_bases {
            let (table, base_col) = base_key.split_once('.').unwrap();
            let start_key = format!("{table}.{base_col}_start");
            let end_key = format!("{table}.{base_col}_end");
            if let (Some(start_v), Some(end_v)) = (values.get(&start_key).cloned(), values.get(&end_key).cloned()) {
                if let (Some(s), Some(e)) = (start_v.as_numeric(), end_v.as_numeric()) {
                    if s > e {
                        values.insert(start_key, end_v);
                        values.insert(end_key, start_v);
                    }
                }
            }
        }

        let assignment: HashMap<(String, String), ColumnValue> = self
            .params
            .iter()
            .map(|p| ((p.table.clone(), p.raw_column.clone()), values[&p.key()].clone()))
            .collect();
        template::render(&template.sql_text, &assignment)
    }
}

/// The objective's target: a closed interval or a single point (§4.C3
/// "Objective").
#[derive(Debug, Clone, Copy)]
pub enum Target {
    Range(f64, f64),
    Single(f64),
}

impl Target {
    /// `1 - similarity`; `None` cost (failed evaluation) scores the worst
    /// (1.0), matching the reference implementation's error-path penalty.
    pub fn objective(&self, cost: Option<f64>) -> f64 {
        let Some(cost) = cost else { return 1.0 };
        if cost <= 0.0 {
            return 1.0;
        }
        let similarity = match *self {
            Target::Range(l, r) => {
                if cost >= l && cost <= r {
                    1.0
                } else {
                    let delta_l = (cost / l).min(l / cost);
                    let delta_r = (cost / r).min(r / cost);
                    delta_l.max(delta_r)
                }
            }
            Target::Single(t) => t.min(cost) / t.max(cost),
        };
        1.0 - similarity
    }
}

/// Request parameters for one `PredicateEnumerator::optimize` call.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeRequest {
    pub trials: usize,
    pub n_init: usize,
    pub reuse_history: bool,
    /// Disables surrogate retraining — pure space-filling (§4.C3 "Initial
    /// profiling").
    pub space_filling_only: bool,
}

impl OptimizeRequest {
    pub fn initial_profiling(n_init: usize) -> Self {
        Self { trials: n_init + 1, n_init, reuse_history: false, space_filling_only: true }
    }

    pub fn targeted(trials: usize, n_init: usize) -> Self {
        Self { trials, n_init, reuse_history: true, space_filling_only: false }
    }
}

/// Outcome of one `optimize` call (§4.C3 "Outputs").
#[derive(Debug, Clone, Copy)]
pub struct OptimizeOutcome {
    pub new_costs_added: usize,
    pub remaining_space_size: u64,
}

/// Evaluate one candidate against the database/cost metric, recording the
/// resulting trial into `history` and returning its objective score.
async fn evaluate_candidate(
    template: &SqlTemplate,
    space: &SearchSpace,
    config: &HashMap<String, usize>,
    target: Target,
    db: &dyn DbConnector,
    metric: &CostMetric,
    reducer: CostReducer,
    history: &mut TemplateRunHistory,
) -> f64 {
    let sql = space.render_candidate(template, config);
    let (costs, scalar) = match metric.evaluate(db, reducer, &sql).await {
        Ok(eval) => (eval.raw, eval.scalar),
        Err(err) => {
            tracing::warn!(error = %err, "cost evaluation failed, recording worst score");
            (Vec::new(), None)
        }
    };
    let string_config: HashMap<String, String> = config
        .iter()
        .map(|(k, idx)| {
            let param = space.params.iter().find(|p| &p.key() == k);
            let val = param
                .map(|p| p.domain[(*idx).min(p.domain.len().saturating_sub(1))].to_string())
                .unwrap_or_default();
            (k.clone(), val)
        })
        .collect();
    history.record(
        reducer,
        TrialRecord { config: string_config, query_text: sql, costs, scalar_cost: scalar },
    );
    target.objective(scalar)
}

/// Simple Latin-hypercube-style design over the ordinal space: each
/// dimension gets an independent random permutation of `n` strata mapped
/// onto its domain, giving stratified coverage without requiring the
/// dimensions to share a common cardinality (§4.C3 "Initial design").
fn latin_hypercube_design(space: &SearchSpace, n: usize, rng: &mut impl Rng) -> Vec<HashMap<String, usize>> {
    if n == 0 || space.is_empty() {
        return Vec::new();
    }
    let mut per_dim: Vec<Vec<usize>> = Vec::with_capacity(space.params.len());
    for p in &space.params {
        let domain_len = p.domain.len();
        let mut perm: Vec<usize> = (0..n).collect();
        // Fisher-Yates shuffle.
        for i in (1..perm.len()).rev() {
            let j = rng.random_range(0..=i);
            perm.swap(i, j);
        }
        let mapped: Vec<usize> = perm
            .iter()
            .map(|&p_i| ((p_i * domain_len) / n).min(domain_len.saturating_sub(1)))
            .collect();
        per_dim.push(mapped);
    }
    let keys = space.keys();
    (0..n)
        .map(|i| keys.iter().cloned().zip(per_dim.iter().map(|d| d[i])).collect())
        .collect()
}

fn random_config(space: &SearchSpace, rng: &mut impl Rng) -> HashMap<String, usize> {
    space
        .params
        .iter()
        .map(|p| (p.key(), rng.random_range(0..p.domain.len())))
        .collect()
}

/// Seed point carried in from history reuse: an already-encoded config plus
/// its re-scored objective, short-circuiting a live DB evaluation.
pub struct SeedPoint {
    pub config: HashMap<String, usize>,
    pub score: f64,
}

/// Re-score every trial in `history` (and any `extra_histories`) under
/// `target`, sort ascending by score, and keep the top 25% as BO seed
/// points (§4.C3 "History reuse"). Trials whose config can't be
/// re-encoded against the current `space` (e.g. a stale column) are
/// skipped rather than erroring.
pub fn reuse_history(
    space: &SearchSpace,
    target: Target,
    histories: &[&TemplateRunHistory],
) -> Vec<SeedPoint> {
    let mut scored: Vec<SeedPoint> = Vec::new();
    for history in histories {
        for trial in history.trials_in_order() {
            let score = target.objective(trial.scalar_cost);
            let mut config = HashMap::new();
            let mut ok = true;
            for p in &space.params {
                let Some(raw) = trial.config.get(&p.key()) else {
                    ok = false;
                    break;
                };
                let Some(idx) = p.domain.iter().position(|v| &v.to_string() == raw) else {
                    ok = false;
                    break;
                };
                config.insert(p.key(), idx);
            }
            if ok {
                scored.push(SeedPoint { config, score });
            }
        }
    }
    scored.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
    let keep = (scored.len() as f64 * 0.25).ceil() as usize;
    scored.truncate(keep.max(0));
    scored
}

/// Run one predicate-search invocation for `template` against `target`,
/// evaluating candidates through `db`/`metric`, appending trials to
/// `history`, and returning the counts C6 needs to update `remaining_space`
/// (§4.C3 "Outputs").
pub async fn optimize(
    template: &SqlTemplate,
    catalog: &ColumnCatalog,
    target: Target,
    db: &dyn DbConnector,
    metric: &CostMetric,
    request: OptimizeRequest,
    seeds: Vec<SeedPoint>,
    history: &mut TemplateRunHistory,
    rng: &mut impl Rng,
) -> OptimizeOutcome {
    let space = SearchSpace::build(template, catalog);
    if space.is_empty() {
        return OptimizeOutcome { new_costs_added: 0, remaining_space_size: 0 };
    }
    let space_size = space.space_size();

    // Boundary: space smaller than requested trials caps both (§8).
    let mut trials = (request.trials as u64).min(space_size.max(1)) as usize;
    let mut n_init = request.n_init.min(trials);

    // Seeded points warm-start the surrogate with their re-scored history
    // objective and don't consume a fresh DB round-trip (§4.C3 "History
    // reuse": `trials <- trials + len(history); n_init <- 0`).
    let mut observed_configs: Vec<HashMap<String, usize>> = Vec::new();
    let mut observed_scores: Vec<f64> = Vec::new();
    if request.reuse_history && !seeds.is_empty() {
        trials += seeds.len();
        n_init = 0;
        for seed in seeds {
            observed_configs.push(seed.config);
            observed_scores.push(seed.score);
        }
    }
    trials = (trials as u64).min(space_size.saturating_add(observed_configs.len() as u64)) as usize;

    let reducer = metric.default_reducer();
    let before_len = history.len();

    let remaining_budget = trials.saturating_sub(observed_configs.len());
    let design = latin_hypercube_design(&space, n_init.min(remaining_budget), rng);

    for config in design {
        if observed_scores.len() >= trials {
            break;
        }
        let score = evaluate_candidate(template, &space, &config, target, db, metric, reducer, history).await;
        observed_configs.push(config);
        observed_scores.push(score);
    }

    if !request.space_filling_only {
        while observed_configs.len() < trials {
            let candidate = if observed_configs.len() >= 2 {
                let forest = trees::ForestSurrogate::fit(
                    &observed_configs.iter().map(|c| trees::encode(c, &space.keys())).collect::<Vec<_>>(),
                    &observed_scores,
                    16,
                    rng,
                );
                let best_so_far = observed_scores.iter().cloned().fold(f64::INFINITY, f64::min);
                let pool: Vec<HashMap<String, usize>> =
                    (0..32.min(space_size.max(1) as usize)).map(|_| random_config(&space, rng)).collect();
                pool.into_iter()
                    .max_by(|a, b| {
                        let (ma, va) = forest.predict(&trees::encode(a, &space.keys()));
                        let (mb, vb) = forest.predict(&trees::encode(b, &space.keys()));
                        let eia = trees::expected_improvement(ma, va, best_so_far);
                        let eib = trees::expected_improvement(mb, vb, best_so_far);
                        eia.partial_cmp(&eib).unwrap()
                    })
                    .unwrap_or_else(|| random_config(&space, rng))
            } else {
                random_config(&space, rng)
            };
            let score =
                evaluate_candidate(template, &space, &candidate, target, db, metric, reducer, history).await;
            observed_configs.push(candidate);
            observed_scores.push(score);
        }
    }

    let new_costs_added = history.len().saturating_sub(before_len);
    let trials_used = observed_configs.len() as u64;
    OptimizeOutcome {
        new_costs_added,
        remaining_space_size: space_size.saturating_sub(trials_used),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnSample;
    use crate::cost::CostMetric;
    use crate::error::Result;
    use crate::model::{GeneratorKind, TemplateConstraints, TemplateProvenance, TypeClass};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap as Map;

    fn catalog() -> ColumnCatalog {
        let json = r#"{"orders": {"o_totalprice": {
            "type_class":"Numeric","min_value":1,"max_value":9,"distinct_count":2,
            "sampled_values":[1,9]
        }}}"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, json).unwrap();
        ColumnCatalog::from_json(&path).unwrap()
    }

    fn template(sql: &str) -> SqlTemplate {
        SqlTemplate {
            template_id: 1,
            sql_text: sql.to_string(),
            constraints: TemplateConstraints::default(),
            provenance: TemplateProvenance {
                created_at: chrono::Utc::now(),
                generator: GeneratorKind::Naive,
                refined_from: None,
                constraint_retries: 0,
                grammar_retries: 0,
            },
        }
    }

    struct IdentityDb;

    #[async_trait]
    impl DbConnector for IdentityDb {
        async fn explain_text(&self, sql: &str) -> Result<String> {
            let value: f64 = sql
                .rsplit('=')
                .next()
                .and_then(|s| s.trim().trim_end_matches(';').parse().ok())
                .unwrap_or(0.0);
            Ok(format!("Seq Scan (cost=0.00..{value:.2} rows=1 width=4)"))
        }
        async fn explain_json(&self, _sql: &str) -> Result<Value> {
            Ok(serde_json::json!({}))
        }
        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
        async fn show_guc(&self, _name: &str) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    #[test]
    fn objective_range_perfect_match_is_zero() {
        let target = Target::Range(10.0, 20.0);
        assert_eq!(target.objective(Some(15.0)), 0.0);
    }

    #[test]
    fn objective_none_cost_is_worst() {
        let target = Target::Range(10.0, 20.0);
        assert_eq!(target.objective(None), 1.0);
    }

    #[test]
    fn objective_single_target_matches_formula() {
        let target = Target::Single(10.0);
        let obj = target.objective(Some(20.0));
        assert!((obj - 0.5).abs() < 1e-9);
    }

    #[test]
    fn search_space_skips_unresolvable_placeholders() {
        let catalog = catalog();
        let t = template("select * from orders where o_totalprice = {{orders.o_totalprice}} and x = {{orders.missing}}");
        let space = SearchSpace::build(&t, &catalog);
        assert_eq!(space.params.len(), 1);
    }

    #[test]
    fn range_pair_is_coerced_to_start_le_end() {
        let json = r#"{"orders": {"o_totalprice": {
            "type_class":"Numeric","min_value":1,"max_value":9,"distinct_count":2,
            "sampled_values":[1,9]
        }}}"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, json).unwrap();
        let catalog = ColumnCatalog::from_json(&path).unwrap();

        let t = template(
            "select * from orders where o_totalprice between {{orders.o_totalprice_start}} and {{orders.o_totalprice_end}}",
        );
        let space = SearchSpace::build(&t, &catalog);
        let mut config = Map::new();
        // start -> domain[1] (=9), end -> domain[0] (=1): must be swapped.
        for p in &space.params {
            if p.is_range_start {
                config.insert(p.key(), 1);
            } else {
                config.insert(p.key(), 0);
            }
        }
        let rendered = space.render_candidate(&t, &config);
        assert!(rendered.contains("between 1 and 9"));
    }

    #[tokio::test]
    async fn initial_profiling_caps_trials_to_space_size() {
        let catalog = catalog();
        let t = template("select * from orders where o_totalprice = {{orders.o_totalprice}}");
        let db = IdentityDb;
        let metric = CostMetric::PlanCost;
        let mut history = TemplateRunHistory::new();
        let mut rng = rand::rng();
        let outcome = optimize(
            &t,
            &catalog,
            Target::Single(5.0),
            &db,
            &metric,
            OptimizeRequest::initial_profiling(10),
            Vec::new(),
            &mut history,
            &mut rng,
        )
        .await;
        // space size is 2 (domain has 2 distinct values); trials requested
        // (11) must be capped to 2.
        assert!(history.len() <= 2);
        assert_eq!(outcome.remaining_space_size, 2 - history.len() as u64);
    }

    #[test]
    fn space_with_no_resolvable_placeholders_is_empty() {
        let catalog = ColumnCatalog::new();
        let t = template("select 1");
        let space = SearchSpace::build(&t, &catalog);
        assert!(space.is_empty());
        assert_eq!(space.space_size(), 1);
    }
}
