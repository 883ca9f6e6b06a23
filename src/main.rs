//! distsynth CLI.
//!
//! This binary wires `SynthRun` to positional CLI arguments, structured
//! logging, and the `SYNTH_LLM_API_KEY` environment variable. The database
//! driver and LLM HTTP client are out-of-scope external collaborators (see
//! lib docs): this binary does not ship a production `DbConnector` or
//! `LlmClient`. Callers who need a real run link against the library and
//! supply their own implementations to `SynthRun`; this binary's stand-ins
//! fail every call with a clear message, which exercises the same recovery
//! paths (`bo::optimize`, `generator`, `refiner`) a flaky production driver
//! would.

use distsynth::catalog::ColumnCatalog;
use distsynth::controller::ControllerPolicy;
use distsynth::cost::DbConnector;
use distsynth::llm::{LlmClient, LlmReply, LlmTotals, MeteredLlmClient};
use distsynth::runner::{CliArgs, RunPaths, SynthRun};
use distsynth::template::generator::{NaiveGenerator, SchemaInfo};
use distsynth::{Result, SynthError};
use std::sync::Arc;

/// Stand-in `DbConnector` for environments with no database wired up.
/// Every call fails; this is intentional, not an oversight (see module
/// docs) — the real connector is supplied by the host application.
struct UnconfiguredDb;

#[async_trait::async_trait]
impl DbConnector for UnconfiguredDb {
    async fn explain_text(&self, _sql: &str) -> Result<String> {
        Err(SynthError::Db(
            "no database connector configured; link distsynth as a library and supply one".to_string(),
        ))
    }
    async fn explain_json(&self, _sql: &str) -> Result<serde_json::Value> {
        Err(SynthError::Db(
            "no database connector configured; link distsynth as a library and supply one".to_string(),
        ))
    }
    async fn execute(&self, _sql: &str) -> Result<()> {
        Err(SynthError::Db(
            "no database connector configured; link distsynth as a library and supply one".to_string(),
        ))
    }
    async fn show_guc(&self, _name: &str) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// Stand-in `LlmClient`. Fails every call unless `SYNTH_LLM_API_KEY` is
/// unset, in which case it fails fast before attempting anything (see
/// `main`).
struct UnconfiguredLlm;

#[async_trait::async_trait]
impl LlmClient for UnconfiguredLlm {
    async fn complete(&self, _prompt: &str) -> Result<LlmReply> {
        Err(SynthError::Llm(
            "no LLM client configured; link distsynth as a library and supply one".to_string(),
        ))
    }
    fn model_name(&self) -> &str {
        "unconfigured"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match CliArgs::parse(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("usage: distsynth <cost_type> <distribution> <total_sqls> <min_cost> <max_cost> <num_intervals> <num_iterations> <db_name>");
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        cost_type = %parsed.cost_type,
        distribution = %parsed.distribution,
        total_sqls = parsed.total_sqls,
        num_iterations = parsed.num_iterations,
        "starting distsynth run"
    );

    if std::env::var("SYNTH_LLM_API_KEY").is_err() {
        tracing::warn!("SYNTH_LLM_API_KEY not set; every LLM-dependent step will fail and be skipped gracefully");
    }

    let paths = RunPaths::under(std::env::current_dir().unwrap_or_else(|_| ".".into()));
    if !paths.column_info.exists() {
        tracing::error!(path = %paths.column_info.display(), "column_info.json not found");
        std::process::exit(1);
    }

    let catalog = ColumnCatalog::from_json(&paths.column_info)?;
    let schema = SchemaInfo {
        tables: catalog
            .tables()
            .map(|t| (t.to_string(), catalog.columns_of(t).into_iter().map(String::from).collect()))
            .collect(),
        foreign_keys: Vec::new(),
    };

    let db = UnconfiguredDb;
    let llm = MeteredLlmClient::new(UnconfiguredLlm);
    let totals: LlmTotals = llm.totals();
    let generator = NaiveGenerator {
        llm: Arc::new(UnconfiguredLlm),
        requirements: vec!["default workload".to_string()],
        templates_per_requirement: 5,
    };

    let run = SynthRun {
        args: parsed,
        paths,
        db: &db,
        llm: &llm,
        generator: &generator,
        schema,
        policy: ControllerPolicy::default(),
        llm_model_name: llm.model_name().to_string(),
        llm_totals: totals,
    };

    match run.run().await {
        Ok(()) => {
            tracing::info!("run complete");
            Ok(())
        }
        Err(err @ (SynthError::Io(_) | SynthError::Catalog(_) | SynthError::InvalidArgument(_) | SynthError::InvalidDistribution(_))) => {
            tracing::error!(error = %err, "fatal error, aborting");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::warn!(error = %err, "run finished with a recoverable error surfaced to the caller");
            Ok(())
        }
    }
}
