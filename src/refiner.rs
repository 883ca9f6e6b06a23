//! C7: Refiner — LLM-driven template mutation targeted at undercovered
//! buckets, run as a pass before the main loop (§4.C6 step 3, §4.C7).
//!
//! Grounded in `examples/original_source/src/sqlbarber/template_generator.py`'s
//! `refine_templates`: cap few-shot context to the templates closest to the
//! target range, describe their observed costs, and ask for either a
//! modified join path/structure or a brand-new template.

use crate::bo::{self, OptimizeRequest, Target};
use crate::catalog::ColumnCatalog;
use crate::controller::{closeness_score, ControllerPolicy};
use crate::cost::{CostMetric, DbConnector};
use crate::distribution::{CurrentDistribution, TargetDistribution};
use crate::error::Result;
use crate::history::TemplateRunHistory;
use crate::llm::{parse_json_lenient, LlmClient};
use crate::model::{GeneratorKind, SqlTemplate, TemplateConstraints, TemplateProvenance};
use crate::template::generator::sanitize_placeholders;
use crate::template::store::TemplateStore;
use crate::util::weighted_sample_without_replacement;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Bounded per-bucket memory of prior refinements: at most 3 examples,
/// replacing the worst when a closer one arrives (§4.C7 step 6).
#[derive(Debug, Clone, Default)]
pub struct FewShotMemory {
    per_bucket: HashMap<usize, Vec<(u64, f64)>>,
}

impl FewShotMemory {
    const CAP: usize = 3;

    pub fn consider(&mut self, bucket: usize, template_id: u64, distance: f64) {
        let entries = self.per_bucket.entry(bucket).or_default();
        if let Some(pos) = entries.iter().position(|(id, _)| *id == template_id) {
            entries[pos].1 = distance;
        } else if entries.len() < Self::CAP {
            entries.push((template_id, distance));
        } else if let Some((worst_idx, worst_dist)) = entries
            .iter()
            .enumerate()
            .max_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap())
            .map(|(i, (_, d))| (i, *d))
        {
            if worst_dist > distance {
                entries[worst_idx] = (template_id, distance);
            }
        }
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    }

    pub fn examples_for(&self, bucket: usize) -> &[(u64, f64)] {
        self.per_bucket.get(&bucket).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

fn history_path(dir: &Path, template_id: u64, metric: &CostMetric) -> PathBuf {
    dir.join(format!("history_{}_{}.json", template_id, metric.name()))
}

fn undercovered_buckets(target: &TargetDistribution, current: &CurrentDistribution, coverage_bound: f64) -> Vec<usize> {
    (0..target.layout.num_intervals)
        .filter(|&i| target.counts[i] > 0)
        .filter(|&i| {
            let coverage = current.counts[i] as f64 / target.counts[i] as f64;
            coverage < coverage_bound
        })
        .collect()
}

fn refine_prompt(
    sampled: &[(u64, f64)],
    few_shot: &[(u64, f64)],
    store: &TemplateStore,
    histories: &HashMap<u64, TemplateRunHistory>,
    l: f64,
    r: f64,
) -> String {
    let mut examples = String::new();
    for (id, _) in sampled {
        if let Some(t) = store.get(*id) {
            let costs = histories.get(id).map(|h| h.scalar_costs()).unwrap_or_default();
            examples.push_str(&format!("Template {id}:\nSQL: {}\nObserved costs: {:?}\n\n", t.sql_text, costs));
        }
    }
    let mut few_shot_text = String::new();
    for (id, distance) in few_shot {
        if let Some(t) = store.get(*id) {
            few_shot_text.push_str(&format!(
                "Prior refinement {id} (distance {distance:.2} from target range):\n{}\n\n",
                t.sql_text
            ));
        }
    }
    let few_shot_block = if few_shot_text.is_empty() {
        String::new()
    } else {
        format!("Prior refinement attempts for this bucket:\n{few_shot_text}")
    };
    format!(
        "We want a SQL query whose instantiated cost falls in the range [{l}, {r}].\n\n\
         Existing templates and their historical observed costs:\n{examples}\n\
         {few_shot_block}\
         Propose a refinement: either change the join path, change the query structure \
         (add/remove a join, aggregation, or predicate), or write a brand-new template — \
         whichever is most likely to land in range. Keep the `{{{{table.column}}}}` \
         placeholder format (and `_start`/`_end` suffixes for ranges).\n\
         Respond as JSON: {{\"sql_template\": \"...\"}}."
    )
}

fn parse_refined_templates(value: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        serde_json::Value::Object(_) => {
            if let Some(sql) = value.get("sql_template").and_then(|v| v.as_str()) {
                out.push(sql.to_string());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                if let Some(sql) = item.get("sql_template").and_then(|v| v.as_str()) {
                    out.push(sql.to_string());
                }
            }
        }
        _ => {}
    }
    out
}

/// One fan-out-then-apply round over `buckets`: for every bucket, rank
/// existing templates by closeness, sample the top `top_k` as few-shot
/// context, call the LLM once, profile whatever comes back, and admit it
/// only if it covers the bucket or helps any other below-target bucket
/// (§4.C7 steps 1-5).
#[allow(clippy::too_many_arguments)]
async fn refine_iteration(
    buckets: &[usize],
    top_k: usize,
    few_shot_enabled: bool,
    memory: &mut FewShotMemory,
    histories: &mut HashMap<u64, TemplateRunHistory>,
    store: &mut TemplateStore,
    target: &TargetDistribution,
    catalog: &ColumnCatalog,
    db: &dyn DbConnector,
    metric: &CostMetric,
    llm: &dyn LlmClient,
    history_dir: &Path,
    current: &mut CurrentDistribution,
    rng: &mut impl Rng,
) -> Result<()> {
    struct BucketPlan {
        bucket: usize,
        sampled: Vec<(u64, f64)>,
        candidates: Vec<String>,
    }

    let mut plans = Vec::with_capacity(buckets.len());
    for &bucket in buckets {
        let (l, r) = target.layout.bounds(bucket);
        let ids: Vec<u64> = store.list().map(|t| t.template_id).collect();
        let mut ranked: Vec<(u64, f64)> = Vec::new();
        for id in &ids {
            let Some(history) = histories.get(id) else { continue };
            let costs = history.scalar_costs();
            if costs.is_empty() {
                continue;
            }
            ranked.push((*id, closeness_score(&costs, l, r)));
        }
        if ranked.is_empty() {
            continue;
        }
        let sampled: Vec<(u64, f64)> =
            weighted_sample_without_replacement(&ranked, top_k.min(ranked.len()), |(_, s)| *s, rng)
                .into_iter()
                .copied()
                .collect();

        let few_shot: Vec<(u64, f64)> =
            if few_shot_enabled { memory.examples_for(bucket).to_vec() } else { Vec::new() };
        let prompt = refine_prompt(&sampled, &few_shot, store, histories, l, r);
        let reply = match llm.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, bucket, "refinement call failed, skipping bucket this round");
                continue;
            }
        };
        let candidates = match parse_json_lenient(&reply.text) {
            Ok(value) => parse_refined_templates(&value),
            Err(_) => Vec::new(),
        };
        plans.push(BucketPlan { bucket, sampled, candidates });
    }

    // Apply results serially: profiling/admission mutates `current`/`store`
    // shared state and must not race across buckets.
    for plan in plans {
        let (l, r) = target.layout.bounds(plan.bucket);
        for candidate_sql in plan.candidates {
            let sanitized = sanitize_placeholders(&candidate_sql, catalog);
            if sanitized.trim().is_empty() {
                continue;
            }
            let template = SqlTemplate {
                template_id: 0,
                sql_text: sanitized,
                constraints: TemplateConstraints::default(),
                provenance: TemplateProvenance {
                    created_at: chrono::Utc::now(),
                    generator: GeneratorKind::Refined,
                    refined_from: plan.sampled.first().map(|(id, _)| *id),
                    constraint_retries: 0,
                    grammar_retries: 0,
                },
            };

            let mut history = TemplateRunHistory::new();
            let request = OptimizeRequest::initial_profiling(5);
            bo::optimize(
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

            let costs = history.scalar_costs();
            if costs.is_empty() {
                continue;
            }

            let covers_bucket = costs.iter().any(|&c| target.layout.bucket_of(c) == Some(plan.bucket));
            let helps_any_undercovered = costs.iter().any(|&c| {
                target
                    .layout
                    .bucket_of(c)
                    .map(|b| current.counts[b] < target.counts[b])
                    .unwrap_or(false)
            });
            if !covers_bucket && !helps_any_undercovered {
                continue;
            }

            let id = store.add(template)?;
            for &c in &costs {
                if let Some(b) = target.layout.bucket_of(c) {
                    current.add(b);
                }
            }
            history.persist(history_path(history_dir, id, metric))?;
            histories.insert(id, history);

            let min_cost = costs.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_cost = costs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let distance = (l - min_cost).max(0.0) + (max_cost - r).max(0.0);
            memory.consider(plan.bucket, id, distance);
        }
    }

    Ok(())
}

/// Run the full refinement pass: up to `policy.main_refine_iterations`
/// rounds over any bucket below its target, then up to
/// `policy.difficult_refine_iterations` rounds over buckets whose coverage
/// is still below `policy.difficult_coverage_threshold`, enabling few-shot
/// context from the second difficult round onward (§4.C6 step 3, §4.C7).
#[allow(clippy::too_many_arguments)]
pub async fn run_refinement_pass(
    histories: &mut HashMap<u64, TemplateRunHistory>,
    store: &mut TemplateStore,
    target: &TargetDistribution,
    catalog: &ColumnCatalog,
    db: &dyn DbConnector,
    metric: &CostMetric,
    llm: &dyn LlmClient,
    history_dir: &Path,
    current: &mut CurrentDistribution,
    policy: &ControllerPolicy,
    rng: &mut impl Rng,
) -> Result<()> {
    let mut memory = FewShotMemory::default();

    for _ in 0..policy.main_refine_iterations {
        let undercovered = undercovered_buckets(target, current, 1.0);
        if undercovered.is_empty() {
            break;
        }
        refine_iteration(
            &undercovered, 3, false, &mut memory, histories, store, target, catalog, db, metric, llm,
            history_dir, current, rng,
        )
        .await?;
    }

    for iteration in 0..policy.difficult_refine_iterations {
        let difficult = undercovered_buckets(target, current, policy.difficult_coverage_threshold);
        if difficult.is_empty() {
            break;
        }
        let few_shot_enabled = iteration >= 1;
        refine_iteration(
            &difficult, 5, few_shot_enabled, &mut memory, histories, store, target, catalog, db, metric, llm,
            history_dir, current, rng,
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_shot_memory_caps_at_three_and_keeps_closest() {
        let mut memory = FewShotMemory::default();
        memory.consider(0, 1, 10.0);
        memory.consider(0, 2, 5.0);
        memory.consider(0, 3, 20.0);
        memory.consider(0, 4, 1.0);
        let examples = memory.examples_for(0);
        assert_eq!(examples.len(), 3);
        assert!(examples.iter().any(|(id, _)| *id == 4));
        assert!(!examples.iter().any(|(id, _)| *id == 3));
    }

    #[test]
    fn few_shot_memory_updates_existing_entry_in_place() {
        let mut memory = FewShotMemory::default();
        memory.consider(0, 1, 10.0);
        memory.consider(0, 1, 2.0);
        let examples = memory.examples_for(0);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0], (1, 2.0));
    }

    #[test]
    fn parse_refined_templates_handles_object_and_array() {
        let obj = serde_json::json!({"sql_template": "select 1"});
        assert_eq!(parse_refined_templates(&obj), vec!["select 1".to_string()]);

        let arr = serde_json::json!([{"sql_template": "select 1"}, {"sql_template": "select 2"}]);
        assert_eq!(
            parse_refined_templates(&arr),
            vec!["select 1".to_string(), "select 2".to_string()]
        );
    }

    #[test]
    fn undercovered_buckets_skips_zero_target_buckets() {
        let layout = crate::distribution::BucketLayout::new(0.0, 100.0, 4).unwrap();
        let target = TargetDistribution::from_explicit(layout, vec![0, 4, 4, 4]).unwrap();
        let current = CurrentDistribution::zeros(4);
        let buckets = undercovered_buckets(&target, &current, 1.0);
        assert_eq!(buckets, vec![1, 2, 3]);
    }
}
