//! C2: CostMetric — given a concrete SQL string, returns a scalar cost plus
//! the raw per-node cost vector it was reduced from.

mod cpu;

pub use cpu::{CpuGucs, DEFAULT_CPU_INDEX_TUPLE_COST, DEFAULT_CPU_OPERATOR_COST, DEFAULT_CPU_TUPLE_COST};

use crate::error::Result;
use crate::history::CostReducer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Instant;

/// Boundary trait for the (out-of-scope) database connection driver. C2
/// calls through this trait; the actual wire protocol/dialect is supplied
/// by the host application.
#[async_trait::async_trait]
pub trait DbConnector: Send + Sync {
    /// `EXPLAIN <sql>`, returned as the raw multi-line plan text.
    async fn explain_text(&self, sql: &str) -> Result<String>;
    /// `EXPLAIN (FORMAT JSON) <sql>`, returned as the parsed plan tree.
    async fn explain_json(&self, sql: &str) -> Result<Value>;
    /// Execute `sql` for its side effects / wall-clock timing. The result
    /// set, if any, is discarded — only the fact that it completed matters
    /// to `CostMetric::ExecTime`.
    async fn execute(&self, sql: &str) -> Result<()>;
    /// `SHOW <guc_name>`, returning `None` if the driver has no such GUC
    /// (callers fall back to the PostgreSQL-derived defaults in `cpu`).
    async fn show_guc(&self, name: &str) -> Result<Option<f64>>;
}

/// Result of evaluating one concrete SQL string under a `CostMetric`.
#[derive(Debug, Clone)]
pub struct CostEvaluation {
    pub raw: Vec<f64>,
    pub scalar: Option<f64>,
}

/// The four cost-metric variants (§2, §4.C2). Tagged-variant dispatch, not
/// deep inheritance (§9 "Polymorphism") — they only share the `evaluate`
/// contract.
#[derive(Debug, Clone)]
pub enum CostMetric {
    Card,
    PlanCost,
    ExecTime,
    CpuPlanCost(CpuGucs),
}

impl CostMetric {
    /// Short name used for CLI parsing and history/summary file naming
    /// (§6 "CLI").
    pub fn name(&self) -> &'static str {
        match self {
            CostMetric::Card => "card",
            CostMetric::PlanCost => "cost",
            CostMetric::ExecTime => "time",
            CostMetric::CpuPlanCost(_) => "cpu",
        }
    }

    /// The reducer each variant "typically" uses, per §3/§4.C2. Callers may
    /// override via `ControllerPolicy::cost_reducer_override`.
    pub fn default_reducer(&self) -> CostReducer {
        match self {
            CostMetric::Card => CostReducer::Sum,
            CostMetric::PlanCost => CostReducer::Output,
            CostMetric::ExecTime => CostReducer::Output,
            CostMetric::CpuPlanCost(_) => CostReducer::Output,
        }
    }

    pub async fn evaluate(
        &self,
        db: &dyn DbConnector,
        reducer: CostReducer,
        sql: &str,
    ) -> Result<CostEvaluation> {
        let raw = match self {
            CostMetric::Card => {
                let text = db.explain_text(sql).await?;
                extract_rows(&text)
            }
            CostMetric::PlanCost => {
                let text = db.explain_text(sql).await?;
                extract_plan_costs(&text)
            }
            CostMetric::ExecTime => {
                let start = Instant::now();
                db.execute(sql).await?;
                vec![start.elapsed().as_secs_f64()]
            }
            CostMetric::CpuPlanCost(gucs) => {
                let plan = db.explain_json(sql).await?;
                match cpu::total_cpu_cost(&plan, gucs) {
                    Some(total) => vec![total],
                    None => Vec::new(),
                }
            }
        };
        let scalar = reducer.reduce(&raw);
        Ok(CostEvaluation { raw, scalar })
    }
}

static ROWS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"rows=(\d+)").expect("static regex is valid"));
static COST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cost=\d+\.\d+\.\.(\d+\.\d+)").expect("static regex is valid"));

fn extract_rows(explain_text: &str) -> Vec<f64> {
    ROWS_PATTERN
        .captures_iter(explain_text)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect()
}

fn extract_plan_costs(explain_text: &str) -> Vec<f64> {
    COST_PATTERN
        .captures_iter(explain_text)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_rows_collects_every_token() {
        let text = "Seq Scan on orders  (cost=0.00..10.50 rows=100 width=4)\n  ->  rows=42 filter";
        let rows = extract_rows(text);
        assert_eq!(rows, vec![100.0, 42.0]);
    }

    #[test]
    fn extract_plan_costs_takes_the_total_not_the_startup() {
        let text = "Seq Scan on orders  (cost=12.34..99.99 rows=100 width=4)";
        let costs = extract_plan_costs(text);
        assert_eq!(costs, vec![99.99]);
    }

    struct NullDb;

    #[async_trait::async_trait]
    impl DbConnector for NullDb {
        async fn explain_text(&self, _sql: &str) -> Result<String> {
            Ok("Seq Scan on t (cost=0.00..5.00 rows=3 width=4)".to_string())
        }
        async fn explain_json(&self, _sql: &str) -> Result<Value> {
            Ok(serde_json::json!({"Plan": {"Node Type": "Seq Scan", "Plan Rows": 3.0}}))
        }
        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
        async fn show_guc(&self, _name: &str) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn card_metric_sums_row_estimates() {
        let db = NullDb;
        let eval = CostMetric::Card
            .evaluate(&db, CostReducer::Sum, "select 1")
            .await
            .unwrap();
        assert_eq!(eval.scalar, Some(3.0));
    }

    #[test]
    fn metric_names_match_cli_vocabulary() {
        assert_eq!(CostMetric::Card.name(), "card");
        assert_eq!(CostMetric::PlanCost.name(), "cost");
        assert_eq!(CostMetric::ExecTime.name(), "time");
        assert_eq!(CostMetric::CpuPlanCost(CpuGucs::default()).name(), "cpu");
    }

    #[tokio::test]
    async fn plan_cost_metric_takes_root_total() {
        let db = NullDb;
        let eval = CostMetric::PlanCost
            .evaluate(&db, CostReducer::Output, "select 1")
            .await
            .unwrap();
        assert_eq!(eval.scalar, Some(5.00));
    }
}
