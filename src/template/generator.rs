//! C5: TemplateGenerator — builds `SqlTemplate`s via LLM, two modes (naive,
//! advanced), each followed by a verify-and-repair loop against a
//! `DbConnector` (§4.C5).
//!
//! Grounded in `examples/original_source/src/sqlbarber/template_generator.py`:
//! `NaiveSQLTemplateGenerator` (one LLM call per semantic requirement) and
//! `AdvancedSQLTemplateGenerator` (schema extraction, `generate_joinable_paths`,
//! `generate_prompts` + `check_and_rewrite_templates_parallel`'s bounded
//! constraint/grammar retry loop).

use crate::catalog::ColumnCatalog;
use crate::cost::DbConnector;
use crate::error::Result;
use crate::llm::{parse_json_lenient, LlmClient};
use crate::model::{parse_raw_placeholders, GeneratorKind, SqlTemplate, TemplateConstraints, TemplateProvenance};
use crate::template::canonicalize_column;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DEFAULT_CONSTRAINT_RETRIES: u32 = 5;
pub const DEFAULT_GRAMMAR_RETRIES: u32 = 5;

/// A foreign-key edge used to build the join-path catalog (§4.C5 Advanced
/// Phase A). The schema extractor that discovers these is out of scope
/// (§1); this type is the in-scope representation the generator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Schema facts the generator prompts over: table/column names and FK
/// edges. Deliberately separate from `ColumnCatalog`, which carries value
/// samples for the predicate search rather than join structure.
#[derive(Debug, Clone, Default)]
pub struct SchemaInfo {
    pub tables: BTreeMap<String, Vec<String>>,
    pub foreign_keys: Vec<ForeignKeyEdge>,
}

impl SchemaInfo {
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (table, columns) in &self.tables {
            out.push_str(&format!("Table: {table}\nColumns: {}\n", columns.join(", ")));
            for fk in self.foreign_keys.iter().filter(|fk| &fk.table == table) {
                out.push_str(&format!(
                    "Foreign Key: {} -> {}({})\n",
                    fk.column, fk.ref_table, fk.ref_column
                ));
            }
            out.push('\n');
        }
        out
    }

    fn filtered(&self, tables: &[String]) -> SchemaInfo {
        let tables_set: std::collections::HashSet<&String> = tables.iter().collect();
        SchemaInfo {
            tables: self
                .tables
                .iter()
                .filter(|(t, _)| tables_set.contains(t))
                .map(|(t, c)| (t.clone(), c.clone()))
                .collect(),
            foreign_keys: self
                .foreign_keys
                .iter()
                .filter(|fk| tables_set.contains(&fk.table) && tables_set.contains(&fk.ref_table))
                .cloned()
                .collect(),
        }
    }
}

/// A structural constraint `(num_tables, num_joins, num_aggregations,
/// semantic_requirement)` driving one advanced-mode template (§4.C5 Phase
/// B).
#[derive(Debug, Clone)]
pub struct StructuralConstraint {
    pub num_tables: usize,
    pub num_joins: usize,
    pub num_aggregations: usize,
    pub semantic_requirement: Option<String>,
}

impl StructuralConstraint {
    /// Rescale counts captured against a `reference_tables`-table schema
    /// onto a `target_tables`-table schema (§4.C5 Phase B "possibly
    /// rescaled by a ratio of target-schema size to reference-schema
    /// size"), mirroring the reference implementation's
    /// `generate_prompts`'s `math.ceil(x / num_tables_constraint *
    /// num_tables_target)`.
    pub fn rescaled(&self, reference_tables: usize, target_tables: usize) -> Self {
        if reference_tables == 0 {
            return StructuralConstraint {
                num_tables: self.num_tables,
                num_joins: self.num_joins,
                num_aggregations: self.num_aggregations,
                semantic_requirement: self.semantic_requirement.clone(),
            };
        }
        let ratio = target_tables as f64 / reference_tables as f64;
        let scale = |n: usize| -> usize { ((n as f64) * ratio).ceil() as usize };
        StructuralConstraint {
            num_tables: scale(self.num_tables).max(1),
            num_joins: scale(self.num_joins),
            num_aggregations: scale(self.num_aggregations),
            semantic_requirement: self.semantic_requirement.clone(),
        }
    }
}

/// Common interface for the naive and advanced generators (§4.C5).
#[async_trait::async_trait]
pub trait TemplateGenerator: Send + Sync {
    async fn generate(&self, catalog: &ColumnCatalog, schema: &SchemaInfo) -> Result<Vec<SqlTemplate>>;
}

/// After every LLM response, canonicalize each `{{table.col*}}` placeholder:
/// check `_start`/`_end` first, otherwise strip trailing `_suffix` blocks
/// until a real column name is reached; if none matches, leave the token
/// textually unchanged (§4.C5 "Placeholder sanitation").
pub fn sanitize_placeholders(sql_text: &str, catalog: &ColumnCatalog) -> String {
    let mut out = sql_text.to_string();
    for (table, raw_column) in parse_raw_placeholders(sql_text) {
        let Some((base, is_start, is_end)) = canonicalize_column(&table, &raw_column, catalog) else {
            continue;
        };
        let canonical_suffix = if is_start {
            format!("{base}_start")
        } else if is_end {
            format!("{base}_end")
        } else {
            base
        };
        if canonical_suffix != raw_column {
            let from = format!("{{{{{table}.{raw_column}}}}}");
            let to = format!("{{{{{table}.{canonical_suffix}}}}}");
            out = out.replace(&from, &to);
        }
    }
    out
}

fn new_provenance(generator: GeneratorKind, constraint_retries: u32, grammar_retries: u32) -> TemplateProvenance {
    TemplateProvenance {
        created_at: chrono::Utc::now(),
        generator,
        refined_from: None,
        constraint_retries,
        grammar_retries,
    }
}

/// Naive mode: one LLM call per semantic-requirement entry produces K
/// templates directly from the schema text (§4.C5 "Naive").
pub struct NaiveGenerator {
    pub llm: Arc<dyn LlmClient>,
    pub requirements: Vec<String>,
    pub templates_per_requirement: usize,
}

impl NaiveGenerator {
    fn prompt(&self, schema: &SchemaInfo, requirement: &str) -> String {
        format!(
            "Given the following database schema, generate {count} SQL query templates \
             satisfying this semantic requirement: {requirement}.\n\n{schema}\n\n\
             Use placeholders of the form {{{{table.column}}}} for point predicates, and \
             {{{{table.column_start}}}} / {{{{table.column_end}}}} for range predicates. \
             Respond as a JSON object mapping a template name to its SQL text.",
            count = self.templates_per_requirement,
            requirement = requirement,
            schema = schema.describe(),
        )
    }
}

#[async_trait::async_trait]
impl TemplateGenerator for NaiveGenerator {
    async fn generate(&self, catalog: &ColumnCatalog, schema: &SchemaInfo) -> Result<Vec<SqlTemplate>> {
        let mut out = Vec::new();
        for requirement in &self.requirements {
            let prompt = self.prompt(schema, requirement);
            let reply = match self.llm.complete(&prompt).await {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(error = %err, requirement = %requirement, "naive template generation call failed, skipping");
                    continue;
                }
            };
            let Ok(value) = parse_json_lenient(&reply.text) else {
                tracing::warn!(requirement = %requirement, "naive generator reply was not parseable JSON, skipping");
                continue;
            };
            let Some(map) = value.as_object() else { continue };
            for sql_value in map.values() {
                let Some(sql_text) = sql_value.as_str() else { continue };
                let sanitized = sanitize_placeholders(sql_text, catalog);
                out.push(SqlTemplate {
                    template_id: 0,
                    sql_text: sanitized,
                    constraints: TemplateConstraints {
                        num_tables: 0,
                        num_joins: 0,
                        num_aggregations: 0,
                        semantic_requirement: Some(requirement.clone()),
                    },
                    provenance: new_provenance(GeneratorKind::Naive, 0, 0),
                });
            }
        }
        Ok(out)
    }
}

/// Per-table-count join paths: join length -> candidate table-name paths
/// (§4.C5 Advanced Phase A).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinPathCatalog {
    pub paths: HashMap<usize, Vec<Vec<String>>>,
}

impl JoinPathCatalog {
    /// Ask the LLM, from the schema + FK edges, for all join paths of
    /// length 1 and 2 (§4.C5 Phase A), tolerating a missing/unparseable
    /// reply by returning an empty catalog (callers fall back to
    /// "filter to all tables").
    pub async fn generate(llm: &dyn LlmClient, schema: &SchemaInfo) -> JoinPathCatalog {
        let prompt = format!(
            "Given the following database schema, generate all possible joinable paths \
             based on foreign key relationships. Only include paths of one or two joins.\n\n\
             {}\n\nRespond in JSON with keys as join counts (as strings) and values as \
             lists of table-name paths, e.g. {{\"1\": [[\"a\",\"b\"]], \"2\": [[\"a\",\"b\",\"c\"]]}}.",
            schema.describe()
        );
        let reply = match llm.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "join path catalog generation failed, using empty catalog");
                return JoinPathCatalog::default();
            }
        };
        let Ok(value) = parse_json_lenient(&reply.text) else {
            return JoinPathCatalog::default();
        };
        let mut paths = HashMap::new();
        if let Some(obj) = value.as_object() {
            for (key, entries) in obj {
                let Ok(len) = key.parse::<usize>() else { continue };
                let Some(arr) = entries.as_array() else { continue };
                let mut plist = Vec::new();
                for path in arr {
                    if let Some(path_arr) = path.as_array() {
                        let tables: Vec<String> =
                            path_arr.iter().filter_map(|t| t.as_str().map(str::to_string)).collect();
                        if !tables.is_empty() {
                            plist.push(tables);
                        }
                    }
                }
                paths.insert(len, plist);
            }
        }
        JoinPathCatalog { paths }
    }

    pub fn pick_path(&self, num_joins: usize, all_tables: &[String], rng: &mut impl Rng) -> Vec<String> {
        if num_joins == 0 {
            if all_tables.is_empty() {
                return Vec::new();
            }
            let idx = rng.random_range(0..all_tables.len());
            return vec![all_tables[idx].clone()];
        }
        if let Some(candidates) = self.paths.get(&num_joins) {
            if !candidates.is_empty() {
                let idx = rng.random_range(0..candidates.len());
                return candidates[idx].clone();
            }
        }
        all_tables.to_vec()
    }
}

/// Advanced mode: join-path-catalog-constrained structural generation
/// followed by the verify-and-repair loop (§4.C5 "Advanced").
pub struct AdvancedGenerator {
    pub llm: Arc<dyn LlmClient>,
    pub db: Arc<dyn DbConnector>,
    pub join_paths: JoinPathCatalog,
    pub constraints: Vec<StructuralConstraint>,
    pub reference_table_count: usize,
    pub constraint_retry_budget: u32,
    pub grammar_retry_budget: u32,
}

impl AdvancedGenerator {
    fn structural_prompt(&self, schema: &SchemaInfo, constraint: &StructuralConstraint, path: &[String]) -> String {
        format!(
            "Given this filtered database schema (join path: {path:?}):\n{}\n\n\
             Generate one SQL query template accessing exactly {num_tables} tables via exactly \
             {num_joins} joins, with exactly {num_aggs} aggregation functions.{semantic}\n\
             Use placeholders of the form {{{{table.column}}}} for point predicates, and \
             {{{{table.column_start}}}} / {{{{table.column_end}}}} for range predicates.\n\
             Respond as JSON: {{\"sql_template\": \"...\"}}.",
            schema.describe(),
            num_tables = constraint.num_tables,
            num_joins = constraint.num_joins,
            num_aggs = constraint.num_aggregations,
            semantic = constraint
                .semantic_requirement
                .as_ref()
                .map(|r| format!(" It should satisfy: {r}."))
                .unwrap_or_default(),
        )
    }

    fn constraint_check_prompt(&self, sql_text: &str, constraint: &StructuralConstraint) -> String {
        format!(
            "Does the following SQL template access exactly {num_tables} tables via exactly \
             {num_joins} joins with exactly {num_aggs} aggregations?\n\nSQL:\n{sql_text}\n\n\
             Respond as JSON: {{\"result\": \"Satisfied\" or \"Not Satisfied\", \
             \"sql_template\": \"a corrected version if Not Satisfied, else the same SQL\"}}.",
            num_tables = constraint.num_tables,
            num_joins = constraint.num_joins,
            num_aggs = constraint.num_aggregations,
        )
    }

    fn grammar_repair_prompt(&self, sql_text: &str, error: &str, schema: &SchemaInfo) -> String {
        format!(
            "The following SQL template failed to EXPLAIN with error: {error}\n\nSQL:\n{sql_text}\n\n\
             Allowed columns per table:\n{}\n\n\
             Respond as JSON: {{\"sql_template\": \"a corrected SQL template, keeping the \
             {{{{table.column}}}} placeholder format\"}}.",
            schema.describe()
        )
    }

    /// Substitute every placeholder with one real sampled value (or the
    /// literal `'test'` fallback) to run a grammar check (§4.C5 "grammar
    /// check").
    fn render_for_grammar_check(&self, sql_text: &str, catalog: &ColumnCatalog) -> String {
        let mut out = sql_text.to_string();
        for (table, raw_column) in parse_raw_placeholders(sql_text) {
            let literal = canonicalize_column(&table, &raw_column, catalog)
                .and_then(|(base, _, _)| catalog.lookup(&table, &base))
                .and_then(|sample| sample.sampled_values.first())
                .map(|v| v.to_sql_literal())
                .unwrap_or_else(|| "'test'".to_string());
            let token_quoted = format!("'{{{{{table}.{raw_column}}}}}'");
            let token_bare = format!("{{{{{table}.{raw_column}}}}}");
            if out.contains(&token_quoted) {
                out = out.replace(&token_quoted, &literal);
            } else {
                out = out.replace(&token_bare, &literal);
            }
        }
        out
    }

    async fn verify_and_repair(
        &self,
        constraint: &StructuralConstraint,
        filtered_schema: &SchemaInfo,
        path: &[String],
        catalog: &ColumnCatalog,
    ) -> Result<Option<SqlTemplate>> {
        let initial_prompt = self.structural_prompt(filtered_schema, constraint, path);
        let reply = match self.llm.complete(&initial_prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "advanced template generation call failed, skipping");
                return Ok(None);
            }
        };
        let Ok(value) = parse_json_lenient(&reply.text) else { return Ok(None) };
        let mut sql_text = value
            .get("sql_template")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        if sql_text.is_empty() {
            return Ok(None);
        }

        let mut constraint_retries = 0u32;
        loop {
            let check_prompt = self.constraint_check_prompt(&sql_text, constraint);
            let reply = match self.llm.complete(&check_prompt).await {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(error = %err, "constraint check call failed, abandoning template");
                    return Ok(None);
                }
            };
            let Ok(value) = parse_json_lenient(&reply.text) else {
                constraint_retries += 1;
                if constraint_retries >= self.constraint_retry_budget {
                    return Ok(None);
                }
                continue;
            };
            let satisfied = value.get("result").and_then(|v| v.as_str()) == Some("Satisfied");
            if satisfied {
                break;
            }
            constraint_retries += 1;
            if constraint_retries >= self.constraint_retry_budget {
                tracing::warn!("template abandoned after exhausting constraint retries");
                return Ok(None);
            }
            if let Some(rewritten) = value.get("sql_template").and_then(|v| v.as_str()) {
                sql_text = rewritten.trim().to_string();
            }
        }

        let mut grammar_retries = 0u32;
        loop {
            let rendered = self.render_for_grammar_check(&sql_text, catalog);
            match self.db.explain_text(&rendered).await {
                Ok(_) => break,
                Err(err) => {
                    grammar_retries += 1;
                    if grammar_retries >= self.grammar_retry_budget {
                        tracing::warn!(error = %err, "template abandoned after exhausting grammar retries");
                        return Ok(None);
                    }
                    let repair_prompt = self.grammar_repair_prompt(&sql_text, &err.to_string(), filtered_schema);
                    let reply = match self.llm.complete(&repair_prompt).await {
                        Ok(reply) => reply,
                        Err(err) => {
                            tracing::warn!(error = %err, "grammar repair call failed, abandoning template");
                            return Ok(None);
                        }
                    };
                    let Ok(value) = parse_json_lenient(&reply.text) else { return Ok(None) };
                    match value.get("sql_template").and_then(|v| v.as_str()) {
                        Some(rewritten) => sql_text = rewritten.trim().to_string(),
                        None => return Ok(None),
                    }
                }
            }
        }

        let sanitized = sanitize_placeholders(&sql_text, catalog);
        Ok(Some(SqlTemplate {
            template_id: 0,
            sql_text: sanitized,
            constraints: TemplateConstraints {
                num_tables: constraint.num_tables,
                num_joins: constraint.num_joins,
                num_aggregations: constraint.num_aggregations,
                semantic_requirement: constraint.semantic_requirement.clone(),
            },
            provenance: new_provenance(GeneratorKind::Advanced, constraint_retries, grammar_retries),
        }))
    }
}

#[async_trait::async_trait]
impl TemplateGenerator for AdvancedGenerator {
    async fn generate(&self, catalog: &ColumnCatalog, schema: &SchemaInfo) -> Result<Vec<SqlTemplate>> {
        let target_tables = schema.tables.len();
        let all_tables: Vec<String> = schema.tables.keys().cloned().collect();
        let mut rng = rand::rng();
        // Bound fan-out to the core count so a large constraint batch doesn't
        // open hundreds of concurrent LLM/DB calls at once.
        let permits = Arc::new(tokio::sync::Semaphore::new(num_cpus::get().max(1)));

        let mut tasks = Vec::with_capacity(self.constraints.len());
        for constraint in &self.constraints {
            let rescaled = constraint.rescaled(self.reference_table_count, target_tables);
            let path = self.join_paths.pick_path(rescaled.num_joins, &all_tables, &mut rng);
            let filtered = schema.filtered(&path);
            let permits = Arc::clone(&permits);
            tasks.push(async move {
                let _permit = permits.acquire().await.expect("semaphore never closed");
                self.verify_and_repair(&rescaled, &filtered, &path, catalog).await
            });
        }

        let results = futures::future::join_all(tasks).await;
        let mut out = Vec::with_capacity(results.len());
        for result in results {
            if let Some(template) = result? {
                out.push(template);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmReply;
    use crate::error::{Result as SynthResult, SynthError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn empty_catalog() -> ColumnCatalog {
        ColumnCatalog::new()
    }

    struct ScriptedLlm {
        replies: Vec<&'static str>,
        next: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _prompt: &str) -> SynthResult<LlmReply> {
            let i = self.next.fetch_add(1, Ordering::SeqCst) as usize;
            let text = self.replies.get(i).copied().unwrap_or("{}").to_string();
            Ok(LlmReply { text, prompt_tokens: 1, completion_tokens: 1, cost_usd: 0.0 })
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct AlwaysFailDb;

    #[async_trait]
    impl DbConnector for AlwaysFailDb {
        async fn explain_text(&self, _sql: &str) -> SynthResult<String> {
            Err(SynthError::Db("no planner available".to_string()))
        }
        async fn explain_json(&self, _sql: &str) -> SynthResult<serde_json::Value> {
            Err(SynthError::Db("no planner available".to_string()))
        }
        async fn execute(&self, _sql: &str) -> SynthResult<()> {
            Ok(())
        }
        async fn show_guc(&self, _name: &str) -> SynthResult<Option<f64>> {
            Ok(None)
        }
    }

    struct AlwaysOkDb;

    #[async_trait]
    impl DbConnector for AlwaysOkDb {
        async fn explain_text(&self, _sql: &str) -> SynthResult<String> {
            Ok("Seq Scan (cost=0.00..1.00 rows=1 width=4)".to_string())
        }
        async fn explain_json(&self, _sql: &str) -> SynthResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
        async fn execute(&self, _sql: &str) -> SynthResult<()> {
            Ok(())
        }
        async fn show_guc(&self, _name: &str) -> SynthResult<Option<f64>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn naive_generator_produces_sanitized_templates() {
        let llm = ScriptedLlm {
            replies: vec![r#"{"t1": "select * from orders where x = {{orders.o_id}}"}"#],
            next: AtomicU32::new(0),
        };
        let generator = NaiveGenerator {
            llm: Arc::new(llm),
            requirements: vec!["filter orders".to_string()],
            templates_per_requirement: 1,
        };
        let schema = SchemaInfo::default();
        let templates = generator.generate(&empty_catalog(), &schema).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates[0].sql_text.contains("{{orders.o_id}}"));
    }

    #[tokio::test]
    async fn naive_generator_tolerates_llm_failure() {
        struct FailingLlm;
        #[async_trait]
        impl LlmClient for FailingLlm {
            async fn complete(&self, _prompt: &str) -> SynthResult<LlmReply> {
                Err(SynthError::Llm("rate limited".to_string()))
            }
            fn model_name(&self) -> &str {
                "failing"
            }
        }
        let generator = NaiveGenerator {
            llm: Arc::new(FailingLlm),
            requirements: vec!["anything".to_string()],
            templates_per_requirement: 1,
        };
        let templates = generator.generate(&empty_catalog(), &SchemaInfo::default()).await.unwrap();
        assert!(templates.is_empty());
    }

    #[test]
    fn rescaled_constraint_scales_by_table_ratio() {
        let constraint = StructuralConstraint {
            num_tables: 2,
            num_joins: 1,
            num_aggregations: 0,
            semantic_requirement: None,
        };
        let rescaled = constraint.rescaled(4, 8);
        assert_eq!(rescaled.num_tables, 4);
        assert_eq!(rescaled.num_joins, 2);
    }

    #[test]
    fn join_path_catalog_falls_back_to_all_tables_when_empty() {
        let catalog = JoinPathCatalog::default();
        let mut rng = rand::rng();
        let all = vec!["a".to_string(), "b".to_string()];
        let path = catalog.pick_path(1, &all, &mut rng);
        assert_eq!(path, all);
    }

    #[tokio::test]
    async fn advanced_generator_abandons_template_after_grammar_retries_exhausted() {
        let llm = ScriptedLlm {
            replies: vec![
                r#"{"sql_template": "select * from t where c = {{t.c}}"}"#,
                r#"{"result": "Satisfied"}"#,
            ],
            next: AtomicU32::new(0),
        };
        let generator = AdvancedGenerator {
            llm: Arc::new(llm),
            db: Arc::new(AlwaysFailDb),
            join_paths: JoinPathCatalog::default(),
            constraints: vec![StructuralConstraint {
                num_tables: 1,
                num_joins: 0,
                num_aggregations: 0,
                semantic_requirement: None,
            }],
            reference_table_count: 1,
            constraint_retry_budget: DEFAULT_CONSTRAINT_RETRIES,
            grammar_retry_budget: 1,
        };
        let mut schema = SchemaInfo::default();
        schema.tables.insert("t".to_string(), vec!["c".to_string()]);
        let templates = generator.generate(&empty_catalog(), &schema).await.unwrap();
        assert!(templates.is_empty());
    }

    #[tokio::test]
    async fn advanced_generator_admits_template_once_grammar_check_passes() {
        let llm = ScriptedLlm {
            replies: vec![
                r#"{"sql_template": "select * from t where c = {{t.c}}"}"#,
                r#"{"result": "Satisfied"}"#,
            ],
            next: AtomicU32::new(0),
        };
        let generator = AdvancedGenerator {
            llm: Arc::new(llm),
            db: Arc::new(AlwaysOkDb),
            join_paths: JoinPathCatalog::default(),
            constraints: vec![StructuralConstraint {
                num_tables: 1,
                num_joins: 0,
                num_aggregations: 0,
                semantic_requirement: None,
            }],
            reference_table_count: 1,
            constraint_retry_budget: DEFAULT_CONSTRAINT_RETRIES,
            grammar_retry_budget: DEFAULT_GRAMMAR_RETRIES,
        };
        let mut schema = SchemaInfo::default();
        schema.tables.insert("t".to_string(), vec!["c".to_string()]);
        let templates = generator.generate(&empty_catalog(), &schema).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].provenance.generator, GeneratorKind::Advanced);
    }
}
