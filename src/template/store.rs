//! C4: TemplateStore — disk-backed persistence for `SqlTemplate`s (§4.C4).
//!
//! Each template is written as `template_<id>.sql`: SQL text prefixed by a
//! `--`-comment metadata header (§6 "Template files"). IDs are monotonic
//! integers derived from the max observed, consistent with the teacher's
//! catalog ID-allocation convention.

use crate::error::{Result, SynthError};
use crate::model::{GeneratorKind, SqlTemplate, TemplateConstraints, TemplateProvenance};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    templates: BTreeMap<u64, SqlTemplate>,
    next_id: u64,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), templates: BTreeMap::new(), next_id: 1 }
    }

    /// Load every `template_<id>.sql` file already present in `dir`,
    /// resuming ID allocation from the max observed.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut store = Self::new(&dir);
        if !dir.exists() {
            return Ok(store);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !name.starts_with("template_") || !name.ends_with(".sql") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            if let Some(template) = parse_template_file(&text) {
                store.next_id = store.next_id.max(template.template_id + 1);
                store.templates.insert(template.template_id, template);
            }
        }
        Ok(store)
    }

    /// Allocate a fresh monotonic ID, persist `template_<id>.sql`, and add
    /// the template to the in-memory set (§4.C4 "add").
    pub fn add(&mut self, mut template: SqlTemplate) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        template.template_id = id;
        self.write_file(&template)?;
        self.templates.insert(id, template);
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Option<&SqlTemplate> {
        self.templates.get(&id)
    }

    pub fn list(&self) -> impl Iterator<Item = &SqlTemplate> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Remove every template failing `predicate`, both in memory and on
    /// disk (§4.C4 Rust addition "prune").
    pub fn prune(&mut self, predicate: impl Fn(&SqlTemplate) -> bool) -> Result<Vec<u64>> {
        let doomed: Vec<u64> = self
            .templates
            .iter()
            .filter(|(_, t)| !predicate(t))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.templates.remove(id);
            let path = self.file_path(*id);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(doomed)
    }

    fn file_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("template_{id}.sql"))
    }

    fn write_file(&self, template: &SqlTemplate) -> Result<()> {
        let text = render_template_file(template);
        crate::util::write_file_atomic(&self.file_path(template.template_id), text.as_bytes())
    }
}

/// Render the `--`-comment metadata header plus SQL body (§6).
fn render_template_file(template: &SqlTemplate) -> String {
    let mut out = String::new();
    out.push_str(&format!("-- Template ID: {}\n", template.template_id));
    out.push_str(&format!(
        "-- Creation Time: {}\n",
        template.provenance.created_at.to_rfc3339()
    ));
    out.push_str(&format!("-- Generator: {:?}\n", template.provenance.generator));
    out.push_str("-- Constraints:\n");
    out.push_str(&format!("--   num_tables: {}\n", template.constraints.num_tables));
    out.push_str(&format!("--   num_joins: {}\n", template.constraints.num_joins));
    out.push_str(&format!(
        "--   num_aggregations: {}\n",
        template.constraints.num_aggregations
    ));
    if let Some(req) = &template.constraints.semantic_requirement {
        out.push_str(&format!("--   semantic_requirement: {req}\n"));
    }
    if let Some(parent) = template.provenance.refined_from {
        out.push_str("-- Refined SQL Template Metadata:\n");
        out.push_str(&format!("--   refined_from: {parent}\n"));
    }
    out.push_str(&format!(
        "-- Rewrite Attempts: constraints_retries={} grammar_retries={}\n",
        template.provenance.constraint_retries, template.provenance.grammar_retries
    ));
    out.push('\n');
    out.push_str(&template.sql_text);
    out.push('\n');
    out
}

/// Parse a template file written by `render_template_file`. Tolerates
/// missing optional fields; a malformed file is skipped by the loader
/// rather than aborting the whole load (template-local degradation, not a
/// fatal I/O error per §7).
fn parse_template_file(text: &str) -> Option<SqlTemplate> {
    let mut template_id = None;
    let mut created_at = None;
    let mut generator = GeneratorKind::Naive;
    let mut constraints = TemplateConstraints::default();
    let mut refined_from = None;
    let mut constraint_retries = 0;
    let mut grammar_retries = 0;
    let mut body_lines = Vec::new();
    let mut in_body = false;

    for line in text.lines() {
        if !in_body && !line.starts_with("--") {
            if line.trim().is_empty() {
                in_body = true;
            }
            continue;
        }
        if in_body {
            body_lines.push(line);
            continue;
        }
        let content = line.trim_start_matches('-').trim();
        if let Some(v) = content.strip_prefix("Template ID:") {
            template_id = v.trim().parse::<u64>().ok();
        } else if let Some(v) = content.strip_prefix("Creation Time:") {
            created_at = chrono::DateTime::parse_from_rfc3339(v.trim())
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc));
        } else if let Some(v) = content.strip_prefix("Generator:") {
            generator = match v.trim() {
                "Advanced" => GeneratorKind::Advanced,
                "Refined" => GeneratorKind::Refined,
                _ => GeneratorKind::Naive,
            };
        } else if let Some(v) = content.strip_prefix("num_tables:") {
            constraints.num_tables = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = content.strip_prefix("num_joins:") {
            constraints.num_joins = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = content.strip_prefix("num_aggregations:") {
            constraints.num_aggregations = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = content.strip_prefix("semantic_requirement:") {
            constraints.semantic_requirement = Some(v.trim().to_string());
        } else if let Some(v) = content.strip_prefix("refined_from:") {
            refined_from = v.trim().parse().ok();
        } else if let Some(v) = content.strip_prefix("Rewrite Attempts:") {
            for part in v.split_whitespace() {
                if let Some(n) = part.strip_prefix("constraints_retries=") {
                    constraint_retries = n.parse().unwrap_or(0);
                } else if let Some(n) = part.strip_prefix("grammar_retries=") {
                    grammar_retries = n.parse().unwrap_or(0);
                }
            }
        }
    }

    Some(SqlTemplate {
        template_id: template_id?,
        sql_text: body_lines.join("\n").trim().to_string(),
        constraints,
        provenance: TemplateProvenance {
            created_at: created_at.unwrap_or_else(chrono::Utc::now),
            generator,
            refined_from,
            constraint_retries,
            grammar_retries,
        },
    })
}

pub fn load_or_err(dir: impl AsRef<Path>) -> Result<TemplateStore> {
    TemplateStore::load(dir.as_ref().to_path_buf())
        .map_err(|e| SynthError::TemplateStore(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeneratorKind;

    fn sample_template(id: u64) -> SqlTemplate {
        SqlTemplate {
            template_id: id,
            sql_text: "select * from orders where o_totalprice = {{orders.o_totalprice}}"
                .to_string(),
            constraints: TemplateConstraints {
                num_tables: 1,
                num_joins: 0,
                num_aggregations: 0,
                semantic_requirement: Some("filter by price".to_string()),
            },
            provenance: TemplateProvenance {
                created_at: chrono::Utc::now(),
                generator: GeneratorKind::Naive,
                refined_from: None,
                constraint_retries: 0,
                grammar_retries: 0,
            },
        }
    }

    #[test]
    fn add_allocates_monotonic_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::new(dir.path());
        let id1 = store.add(sample_template(0)).unwrap();
        let id2 = store.add(sample_template(0)).unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn reload_resumes_id_allocation_past_max() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = TemplateStore::new(dir.path());
            store.add(sample_template(0)).unwrap();
            store.add(sample_template(0)).unwrap();
        }
        let mut reloaded = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        let id = reloaded.add(sample_template(0)).unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn prune_removes_failing_templates_from_disk_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::new(dir.path());
        let id1 = store.add(sample_template(0)).unwrap();
        let id2 = store.add(sample_template(0)).unwrap();
        let removed = store.prune(|t| t.template_id != id1).unwrap();
        assert_eq!(removed, vec![id1]);
        assert!(store.get(id1).is_none());
        assert!(store.get(id2).is_some());
        assert!(!dir.path().join(format!("template_{id1}.sql")).exists());
    }

    #[test]
    fn round_trip_preserves_sql_text_and_constraints() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TemplateStore::new(dir.path());
        let id = store.add(sample_template(0)).unwrap();
        let reloaded = TemplateStore::load(dir.path()).unwrap();
        let t = reloaded.get(id).unwrap();
        assert_eq!(t.sql_text, sample_template(0).sql_text);
        assert_eq!(t.constraints.num_tables, 1);
    }
}
