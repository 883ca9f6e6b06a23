//! C1: ColumnCatalog — per-table, per-column metadata used to build the
//! predicate search space in `bo::mod`.

use crate::error::{Result, SynthError};
use crate::model::{ColumnValue, TypeClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default cap on sampled distinct values kept per column (§2, C1).
pub const DEFAULT_SAMPLE_CAP: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSample {
    pub type_class: TypeClass,
    pub min_value: Option<ColumnValue>,
    pub max_value: Option<ColumnValue>,
    pub distinct_count: u64,
    pub sampled_values: Vec<ColumnValue>,
}

impl ColumnSample {
    /// Sampled values deduplicated and ordered per §4.C3: NUMERIC columns
    /// ascending by value, everything else by first-seen (insertion) order.
    pub fn ordered_domain(&self) -> Vec<ColumnValue> {
        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<ColumnValue> = Vec::new();
        for v in &self.sampled_values {
            let key = v.to_string();
            if seen.insert(key) {
                out.push(v.clone());
            }
        }
        if self.type_class == TypeClass::Numeric {
            out.sort_by(crate::model::numeric_cmp);
        }
        out
    }
}

/// Boundary trait for the (out-of-scope) column-metadata extractor: the
/// policy of "single multi-aggregate query per table, fallback to
/// per-column on failure" lives in `ColumnCatalog::extract`; the actual SQL
/// dialect/driver executing those queries is supplied by the caller.
#[async_trait::async_trait]
pub trait ColumnSource: Send + Sync {
    async fn columns_of(&self, table: &str) -> Result<Vec<String>>;
    /// Run the batched multi-aggregate extraction for every column of
    /// `table` in one round-trip. Returns `Err` to trigger the per-column
    /// fallback.
    async fn extract_table_batch(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<HashMap<String, ColumnSample>>;
    /// Per-column fallback extraction, used when the batched query fails.
    async fn extract_column(&self, table: &str, column: &str) -> Result<ColumnSample>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnCatalog {
    tables: HashMap<String, HashMap<String, ColumnSample>>,
}

impl ColumnCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a previously-extracted `column_info.json` file (the
    /// in-scope path per §1: the extractor's query logic is external, but
    /// consuming its documented output schema is not).
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(SynthError::Io)?;
        let tables: HashMap<String, HashMap<String, ColumnSample>> =
            serde_json::from_str(&text).map_err(SynthError::Json)?;
        Ok(Self { tables })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.tables).map_err(SynthError::Json)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        crate::util::write_file_atomic(path.as_ref(), json.as_bytes())
    }

    /// Extract catalog metadata against a live `ColumnSource`, batching per
    /// table with a per-column fallback on batch failure (§4.C1).
    pub async fn extract(source: &dyn ColumnSource, tables: &[String]) -> Result<Self> {
        let mut catalog = ColumnCatalog::new();
        for table in tables {
            let columns = source.columns_of(table).await?;
            let samples = match source.extract_table_batch(table, &columns).await {
                Ok(samples) => samples,
                Err(err) => {
                    tracing::warn!(
                        table = %table,
                        error = %err,
                        "batched column extraction failed, falling back to per-column"
                    );
                    let mut samples = HashMap::new();
                    for column in &columns {
                        match source.extract_column(table, column).await {
                            Ok(sample) => {
                                samples.insert(column.clone(), sample);
                            }
                            Err(err) => {
                                tracing::warn!(
                                    table = %table,
                                    column = %column,
                                    error = %err,
                                    "skipping column after extraction failure"
                                );
                            }
                        }
                    }
                    samples
                }
            };
            catalog.tables.insert(table.clone(), samples);
        }
        Ok(catalog)
    }

    /// Total contract: absence means "column unknown", never an error —
    /// callers (the search-space builder in `bo::mod`) must skip such
    /// placeholders rather than fail the template.
    pub fn lookup(&self, table: &str, column: &str) -> Option<&ColumnSample> {
        self.tables.get(table)?.get(column)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    pub fn columns_of(&self, table: &str) -> Vec<&str> {
        self.tables
            .get(table)
            .map(|cols| cols.keys().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> ColumnCatalog {
        let mut tables = HashMap::new();
        let mut orders = HashMap::new();
        orders.insert(
            "o_totalprice".to_string(),
            ColumnSample {
                type_class: TypeClass::Numeric,
                min_value: Some(ColumnValue::Float(1.0)),
                max_value: Some(ColumnValue::Float(9.0)),
                distinct_count: 2,
                sampled_values: vec![ColumnValue::Float(9.0), ColumnValue::Float(1.0)],
            },
        );
        tables.insert("orders".to_string(), orders);
        ColumnCatalog { tables }
    }

    #[test]
    fn lookup_is_total_and_absence_is_none() {
        let catalog = sample_catalog();
        assert!(catalog.lookup("orders", "o_totalprice").is_some());
        assert!(catalog.lookup("orders", "missing_col").is_none());
        assert!(catalog.lookup("missing_table", "x").is_none());
    }

    #[test]
    fn ordered_domain_sorts_numeric_ascending() {
        let catalog = sample_catalog();
        let sample = catalog.lookup("orders", "o_totalprice").unwrap();
        let domain = sample.ordered_domain();
        assert_eq!(domain, vec![ColumnValue::Float(1.0), ColumnValue::Float(9.0)]);
    }

    #[test]
    fn json_round_trip_is_identity() {
        let catalog = sample_catalog();
        let json = catalog.to_json().unwrap();
        let restored: HashMap<String, HashMap<String, ColumnSample>> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), catalog.tables.len());
        let sample = &restored["orders"]["o_totalprice"];
        assert_eq!(sample.distinct_count, 2);
    }
}
