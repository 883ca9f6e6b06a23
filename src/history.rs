//! TemplateRunHistory: per-template, append-only, order-preserving record of
//! every trial the predicate enumerator has ever run, keyed by the literal
//! rendered SQL string (§3, §6 "History files").

use crate::error::{Result, SynthError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// How a trial's raw per-node cost vector reduces to the scalar used for
/// bucket placement and the BO objective (§3, §4.C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostReducer {
    /// First/root element of the cost vector (typical for `PLAN_COST`).
    Output,
    /// Sum of the cost vector (typical for `CARD`).
    Sum,
}

impl CostReducer {
    pub fn reduce(&self, costs: &[f64]) -> Option<f64> {
        if costs.is_empty() {
            return None;
        }
        Some(match self {
            CostReducer::Output => costs[0],
            CostReducer::Sum => costs.iter().sum(),
        })
    }
}

/// One recorded trial: the placeholder assignment that produced
/// `query_text`, its raw per-node cost vector, and the reduced scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub config: HashMap<String, String>,
    pub query_text: String,
    pub costs: Vec<f64>,
    pub scalar_cost: Option<f64>,
}

/// Append-only, insertion-order-preserving, dedup-by-`query_text` history
/// for a single `(template, cost metric)` pair.
#[derive(Debug, Clone, Default)]
pub struct TemplateRunHistory {
    order: Vec<String>,
    by_query: HashMap<String, TrialRecord>,
}

impl TemplateRunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a trial. Revisiting an existing `query_text` updates
    /// its cost vector in place without creating a duplicate entry or
    /// disturbing its position in insertion order (§8 invariant).
    pub fn record(&mut self, reducer: CostReducer, trial: TrialRecord) {
        let mut trial = trial;
        trial.scalar_cost = reducer.reduce(&trial.costs);
        if !self.by_query.contains_key(&trial.query_text) {
            self.order.push(trial.query_text.clone());
        }
        self.by_query.insert(trial.query_text.clone(), trial);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Trials in insertion order — the canonical identity for dedup and for
    /// history-reuse seeding (§4.C3 "History reuse").
    pub fn trials_in_order(&self) -> impl Iterator<Item = &TrialRecord> {
        self.order.iter().filter_map(move |q| self.by_query.get(q))
    }

    pub fn scalar_costs(&self) -> Vec<f64> {
        self.trials_in_order().filter_map(|t| t.scalar_cost).collect()
    }

    /// Persist as an ordered JSON object `{query_text: [costs...]}`
    /// (§6 "History files"), merging with whatever is already on disk so a
    /// re-run never drops earlier trials.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut existing: Map<String, Value> = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            Map::new()
        };
        for query in &self.order {
            if let Some(trial) = self.by_query.get(query) {
                existing.insert(query.clone(), serde_json::to_value(&trial.costs)?);
            }
        }
        let json = serde_json::to_string_pretty(&Value::Object(existing))?;
        crate::util::write_file_atomic(path, json.as_bytes())
    }

    /// Load raw cost vectors from a persisted history file, in the order
    /// they occur in the file (which, because we always write with
    /// `preserve_order`, is the original insertion order).
    pub fn load_raw(path: impl AsRef<Path>) -> Result<Vec<(String, Vec<f64>)>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path)?;
        let map: Map<String, Value> = serde_json::from_str(&text).map_err(SynthError::Json)?;
        let mut out = Vec::with_capacity(map.len());
        for (query, value) in map {
            let costs: Vec<f64> = serde_json::from_value(value).unwrap_or_default();
            out.push((query, costs));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(q: &str, costs: Vec<f64>) -> TrialRecord {
        TrialRecord {
            config: HashMap::new(),
            query_text: q.to_string(),
            costs,
            scalar_cost: None,
        }
    }

    #[test]
    fn revisiting_query_updates_without_duplicating() {
        let mut h = TemplateRunHistory::new();
        h.record(CostReducer::Output, trial("select 1", vec![10.0]));
        h.record(CostReducer::Output, trial("select 2", vec![20.0]));
        h.record(CostReducer::Output, trial("select 1", vec![99.0]));

        assert_eq!(h.len(), 2);
        let costs: Vec<f64> = h.scalar_costs();
        assert_eq!(costs, vec![99.0, 20.0]);
    }

    #[test]
    fn persist_then_load_round_trips_and_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist.json");

        let mut h = TemplateRunHistory::new();
        h.record(CostReducer::Sum, trial("select b", vec![1.0, 2.0]));
        h.record(CostReducer::Sum, trial("select a", vec![3.0]));
        h.persist(&path).unwrap();

        let loaded = TemplateRunHistory::load_raw(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, "select b");
        assert_eq!(loaded[1].0, "select a");
    }

    #[test]
    fn reducers_match_spec_semantics() {
        assert_eq!(CostReducer::Output.reduce(&[5.0, 6.0, 7.0]), Some(5.0));
        assert_eq!(CostReducer::Sum.reduce(&[5.0, 6.0, 7.0]), Some(18.0));
        assert_eq!(CostReducer::Sum.reduce(&[]), None);
    }
}
