//! Added: crate-level orchestration (§2.1). `SynthRun` wires C1-C7 together
//! end to end, grounded in how `rusty_db::main` wires `Server`, `Catalog`,
//! and `RestApiServer` together — plumbing, not a new algorithmic component.

use crate::catalog::ColumnCatalog;
use crate::controller::{self, ControllerPolicy};
use crate::cost::{CostMetric, CpuGucs, DbConnector};
use crate::distribution::{BucketLayout, DistributionFamily, TargetDistribution};
use crate::error::{Result, SynthError};
use crate::history::TemplateRunHistory;
use crate::llm::{LlmClient, LlmTotals, LlmTotalsSnapshot};
use crate::template::generator::{SchemaInfo, TemplateGenerator};
use crate::template::store::TemplateStore;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

/// Positional CLI arguments, parsed by hand (§6 "CLI"; no argument-parsing
/// library — that's an out-of-scope external collaborator per §1).
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub cost_type: String,
    pub distribution: String,
    pub total_sqls: u64,
    pub min_cost: f64,
    pub max_cost: f64,
    pub num_intervals: usize,
    pub num_iterations: u32,
    pub db_name: String,
}

impl CliArgs {
    /// Parse `cost_type distribution total_sqls min_cost max_cost
    /// num_intervals num_iterations db_name` (§6).
    pub fn parse(args: &[String]) -> Result<Self> {
        if args.len() != 8 {
            return Err(SynthError::InvalidArgument(format!(
                "expected 8 positional arguments (cost_type distribution total_sqls min_cost \
                 max_cost num_intervals num_iterations db_name), got {}",
                args.len()
            )));
        }
        let field = |i: usize| args[i].as_str();
        let parse_num = |i: usize, name: &str| -> Result<f64> {
            field(i)
                .parse::<f64>()
                .map_err(|_| SynthError::InvalidArgument(format!("{name} must be numeric, got {:?}", field(i))))
        };
        let parse_u64 = |i: usize, name: &str| -> Result<u64> {
            field(i)
                .parse::<u64>()
                .map_err(|_| SynthError::InvalidArgument(format!("{name} must be a non-negative integer, got {:?}", field(i))))
        };
        let parse_usize = |i: usize, name: &str| -> Result<usize> {
            field(i)
                .parse::<usize>()
                .map_err(|_| SynthError::InvalidArgument(format!("{name} must be a non-negative integer, got {:?}", field(i))))
        };
        let parse_u32 = |i: usize, name: &str| -> Result<u32> {
            field(i)
                .parse::<u32>()
                .map_err(|_| SynthError::InvalidArgument(format!("{name} must be a non-negative integer, got {:?}", field(i))))
        };

        let cost_type = field(0).to_string();
        if !matches!(cost_type.as_str(), "card" | "cost" | "time" | "cpu") {
            return Err(SynthError::InvalidArgument(format!(
                "cost_type must be one of card/cost/time/cpu, got {cost_type:?}"
            )));
        }

        Ok(Self {
            cost_type,
            distribution: field(1).to_string(),
            total_sqls: parse_u64(2, "total_sqls")?,
            min_cost: parse_num(3, "min_cost")?,
            max_cost: parse_num(4, "max_cost")?,
            num_intervals: parse_usize(5, "num_intervals")?,
            num_iterations: parse_u32(6, "num_iterations")?,
            db_name: field(7).to_string(),
        })
    }

    /// Resolve the metric without touching the database — `cpu` gets the
    /// hardcoded defaults. Prefer `resolve_cost_metric` in production code,
    /// which fetches the GUCs for `cpu` via `DbConnector::show_guc` (§4.C2,
    /// §6).
    pub fn cost_metric(&self) -> CostMetric {
        match self.cost_type.as_str() {
            "card" => CostMetric::Card,
            "cost" => CostMetric::PlanCost,
            "time" => CostMetric::ExecTime,
            "cpu" => CostMetric::CpuPlanCost(Default::default()),
            _ => unreachable!("validated in parse()"),
        }
    }

    /// Same as `cost_metric`, but for `cpu` resolves the GUC constants
    /// against `db` (falling back to defaults per-GUC), rather than always
    /// using the hardcoded defaults (§4.C2 "fetched from DB or defaults").
    pub async fn resolve_cost_metric(&self, db: &dyn DbConnector) -> CostMetric {
        match self.cost_type.as_str() {
            "cpu" => CostMetric::CpuPlanCost(CpuGucs::from_db(db).await),
            _ => self.cost_metric(),
        }
    }
}

/// Where `SynthRun` reads its inputs from and writes its outputs to.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub column_info: PathBuf,
    pub template_dir: PathBuf,
    pub history_dir: PathBuf,
    pub workload_out: PathBuf,
    pub summary_out: PathBuf,
}

impl RunPaths {
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            column_info: base.join("column_info.json"),
            template_dir: base.join("templates"),
            history_dir: base.join("history"),
            workload_out: base.join("workload.json"),
            summary_out: base.join("summary.json"),
        }
    }
}

#[derive(Debug, Serialize)]
struct WorkloadRow<'a> {
    query_id: u64,
    template_id: u64,
    query: &'a str,
    cost_type: &'a str,
    cost: f64,
}

#[derive(Debug, Serialize)]
struct BucketSummary {
    lower: f64,
    upper: f64,
    target: u64,
    actual: u64,
}

#[derive(Debug, Serialize)]
struct SummaryOutput {
    cost_type: String,
    distribution: String,
    total_sqls: u64,
    min_cost: f64,
    max_cost: f64,
    num_intervals: usize,
    num_iterations: u32,
    db_name: String,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: chrono::DateTime<chrono::Utc>,
    wall_time_secs: f64,
    wasserstein_history: Vec<f64>,
    missing_buckets: Vec<usize>,
    buckets: Vec<BucketSummary>,
    per_template_query_count: HashMap<u64, usize>,
    llm_model: String,
    llm_totals: LlmTotalsSnapshot,
}

/// Top-level orchestration type (§2.1). Owns no state itself beyond what it
/// needs to wire C1-C7 and write the two output files.
pub struct SynthRun<'a> {
    pub args: CliArgs,
    pub paths: RunPaths,
    pub db: &'a dyn DbConnector,
    pub llm: &'a dyn LlmClient,
    pub generator: &'a dyn TemplateGenerator,
    pub schema: SchemaInfo,
    pub policy: ControllerPolicy,
    pub llm_model_name: String,
    /// Shared totals handle owned by whatever `MeteredLlmClient` the caller
    /// wrapped `llm` in, surfaced verbatim in `summary.json`. `LlmTotals`
    /// clones cheaply (an `Arc<Mutex<_>>` internally), so passing a fresh
    /// default here just means zeros get reported.
    pub llm_totals: LlmTotals,
}

impl<'a> SynthRun<'a> {
    /// Build the target distribution from the parsed CLI's distribution
    /// selector: a named family, or a path to a JSON file holding either an
    /// explicit per-bucket count array or a flat array of sample costs
    /// (§2.1 step 2, §4.C6 Init).
    fn build_target(&self, layout: BucketLayout) -> Result<TargetDistribution> {
        match self.args.distribution.as_str() {
            "uniform" => Ok(TargetDistribution::from_family(layout, DistributionFamily::Uniform, self.args.total_sqls)),
            "normal" => Ok(TargetDistribution::from_family(layout, DistributionFamily::Normal, self.args.total_sqls)),
            "exponential" => Ok(TargetDistribution::from_family(
                layout,
                DistributionFamily::Exponential,
                self.args.total_sqls,
            )),
            path => {
                let text = std::fs::read_to_string(path).map_err(SynthError::Io)?;
                let value: serde_json::Value = serde_json::from_str(&text).map_err(SynthError::Json)?;
                let numbers: Vec<f64> = value
                    .as_array()
                    .ok_or_else(|| SynthError::InvalidDistribution(format!("{path} is not a JSON array")))?
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .collect();
                if numbers.len() == layout.num_intervals && numbers.iter().all(|v| v.fract() == 0.0 && *v >= 0.0) {
                    let counts: Vec<u64> = numbers.iter().map(|&v| v as u64).collect();
                    TargetDistribution::from_explicit(layout, counts)
                } else {
                    TargetDistribution::from_user_sample(layout, &numbers, self.args.total_sqls)
                }
            }
        }
    }

    /// Run C1-C7 end to end and write `workload.json`/`summary.json`
    /// (§2.1 steps 1-6).
    pub async fn run(&self) -> Result<()> {
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let catalog = ColumnCatalog::from_json(&self.paths.column_info)?;

        let layout = BucketLayout::new(self.args.min_cost, self.args.max_cost, self.args.num_intervals)?;
        let target = self.build_target(layout)?;

        let metric = self.args.resolve_cost_metric(self.db).await;

        std::fs::create_dir_all(&self.paths.template_dir)?;
        std::fs::create_dir_all(&self.paths.history_dir)?;
        let mut store = TemplateStore::load(self.paths.template_dir.clone())?;
        let mut histories: HashMap<u64, TemplateRunHistory> = HashMap::new();
        for template in store.list() {
            let path = self
                .paths
                .history_dir
                .join(format!("history_{}_{}.json", template.template_id, metric.name()));
            let mut history = TemplateRunHistory::new();
            for (query_text, costs) in TemplateRunHistory::load_raw(&path)? {
                history.record(
                    metric.default_reducer(),
                    crate::history::TrialRecord { config: HashMap::new(), query_text, costs, scalar_cost: None },
                );
            }
            histories.insert(template.template_id, history);
        }

        let mut rng = rand::rng();
        let outcome = controller::run(
            &target,
            &catalog,
            self.db,
            self.llm,
            &metric,
            self.generator,
            &self.schema,
            &mut store,
            &mut histories,
            &self.paths.history_dir,
            &self.policy,
            self.args.num_iterations,
            &mut rng,
        )
        .await?;

        self.write_outputs(&target, &store, &histories, &outcome, &metric, started_at, start)?;
        Ok(())
    }

    fn write_outputs(
        &self,
        target: &TargetDistribution,
        store: &TemplateStore,
        histories: &HashMap<u64, TemplateRunHistory>,
        outcome: &controller::ControllerOutcome,
        metric: &CostMetric,
        started_at: chrono::DateTime<chrono::Utc>,
        start: Instant,
    ) -> Result<()> {
        let mut rows: Vec<(u64, u64, String, f64)> = Vec::new();
        let mut per_template_count: HashMap<u64, usize> = HashMap::new();
        for template in store.list() {
            let Some(history) = histories.get(&template.template_id) else { continue };
            let mut count = 0usize;
            for trial in history.trials_in_order() {
                let Some(scalar) = trial.scalar_cost else { continue };
                if scalar < self.args.min_cost || scalar > self.args.max_cost {
                    continue;
                }
                count += 1;
                rows.push((0, template.template_id, trial.query_text.clone(), scalar));
            }
            per_template_count.insert(template.template_id, count);
        }
        rows.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap());
        let workload: Vec<WorkloadRow> = rows
            .iter()
            .enumerate()
            .map(|(i, (_, template_id, query, cost))| WorkloadRow {
                query_id: i as u64,
                template_id: *template_id,
                query,
                cost_type: self.args.cost_type.as_str(),
                cost: *cost,
            })
            .collect();
        let workload_json = serde_json::to_string_pretty(&workload)?;
        crate::util::write_file_atomic(&self.paths.workload_out, workload_json.as_bytes())?;

        let buckets: Vec<BucketSummary> = (0..target.layout.num_intervals)
            .map(|i| {
                let (lower, upper) = target.layout.bounds(i);
                BucketSummary { lower, upper, target: target.counts[i], actual: outcome.current.counts[i] }
            })
            .collect();

        let summary = SummaryOutput {
            cost_type: self.args.cost_type.clone(),
            distribution: self.args.distribution.clone(),
            total_sqls: self.args.total_sqls,
            min_cost: self.args.min_cost,
            max_cost: self.args.max_cost,
            num_intervals: self.args.num_intervals,
            num_iterations: self.args.num_iterations,
            db_name: self.args.db_name.clone(),
            started_at,
            finished_at: chrono::Utc::now(),
            wall_time_secs: start.elapsed().as_secs_f64(),
            wasserstein_history: outcome.wasserstein_history.clone(),
            missing_buckets: outcome.missing.iter().copied().collect(),
            buckets,
            per_template_query_count: per_template_count,
            llm_model: self.llm_model_name.clone(),
            llm_totals: self.llm_totals.snapshot(),
        };
        let summary_json = serde_json::to_string_pretty(&summary)?;
        crate::util::write_file_atomic(&self.paths.summary_out, summary_json.as_bytes())?;
        let _ = metric;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(overrides: &[&str]) -> Vec<String> {
        overrides.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_valid_positional_args() {
        let parsed = CliArgs::parse(&args(&["cost", "uniform", "100", "0", "1000", "10", "20", "mydb"])).unwrap();
        assert_eq!(parsed.total_sqls, 100);
        assert_eq!(parsed.num_intervals, 10);
        assert!(matches!(parsed.cost_metric(), CostMetric::PlanCost));
    }

    #[test]
    fn rejects_wrong_arg_count() {
        let err = CliArgs::parse(&args(&["cost", "uniform"])).unwrap_err();
        assert!(matches!(err, SynthError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_unknown_cost_type() {
        let err = CliArgs::parse(&args(&["bogus", "uniform", "100", "0", "1000", "10", "20", "mydb"])).unwrap_err();
        assert!(matches!(err, SynthError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_non_numeric_total_sqls() {
        let err = CliArgs::parse(&args(&["cost", "uniform", "oops", "0", "1000", "10", "20", "mydb"])).unwrap_err();
        assert!(matches!(err, SynthError::InvalidArgument(_)));
    }

    struct GucReportingDb;

    #[async_trait::async_trait]
    impl DbConnector for GucReportingDb {
        async fn explain_text(&self, _sql: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn explain_json(&self, _sql: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
        async fn show_guc(&self, name: &str) -> Result<Option<f64>> {
            match name {
                "cpu_tuple_cost" => Ok(Some(0.25)),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn resolve_cost_metric_fetches_gucs_for_cpu_variant() {
        let parsed = CliArgs::parse(&args(&["cpu", "uniform", "100", "0", "1000", "10", "20", "mydb"])).unwrap();
        let db = GucReportingDb;
        match parsed.resolve_cost_metric(&db).await {
            CostMetric::CpuPlanCost(gucs) => {
                assert_eq!(gucs.cpu_tuple_cost, 0.25);
                assert_eq!(gucs.cpu_index_tuple_cost, crate::cost::DEFAULT_CPU_INDEX_TUPLE_COST);
            }
            other => panic!("expected CpuPlanCost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_cost_metric_leaves_non_cpu_variants_untouched() {
        let parsed = CliArgs::parse(&args(&["card", "uniform", "100", "0", "1000", "10", "20", "mydb"])).unwrap();
        let db = GucReportingDb;
        assert!(matches!(parsed.resolve_cost_metric(&db).await, CostMetric::Card));
    }
}
