//! Aggregation of variable rows into one row per record identifier.
//!
//! Each partition is folded in parallel; partial results are then merged in
//! partition order, so "first" always means first in input order. Every
//! column is reduced with [`all_but_empty_string`].

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{PipelineStep, StepContext};
use crate::dataset::{chunk_rows, Cell, DataLevel, Dataset, Row};
use crate::error::StepResult;

/// Merge two values of the same (record, column) pair.
///
/// Keeps the first non-empty string; an empty string beats null. The merge is
/// associative, so partial aggregates can be combined in any grouping as long
/// as their order is preserved.
pub fn all_but_empty_string(current: Cell, candidate: Cell) -> Cell {
    let current_non_empty = current.as_deref().is_some_and(|c| !c.is_empty());
    if current_non_empty || candidate.is_none() {
        current
    } else {
        candidate
    }
}

fn merge_row(target: &mut Row, source: Row) {
    for (cell, value) in target.iter_mut().zip(source) {
        *cell = all_but_empty_string(cell.take(), value);
    }
}

pub struct AggregateRecordsStep {
    record_id_column: String,
}

impl AggregateRecordsStep {
    pub fn new(record_id_column: &str) -> Self {
        Self {
            record_id_column: record_id_column.to_string(),
        }
    }
}

impl PipelineStep for AggregateRecordsStep {
    fn label(&self) -> &str {
        "aggregate_to_records"
    }

    fn input_level(&self) -> Option<DataLevel> {
        Some(DataLevel::Row)
    }

    fn output_level(&self, _input: DataLevel) -> DataLevel {
        DataLevel::Record
    }

    fn run(&self, dataset: Dataset, _ctx: &mut StepContext<'_>) -> StepResult<Dataset> {
        let id_idx = dataset.schema().require(&self.record_id_column)?;
        let rows_before = dataset.row_count();
        let (schema, partitions, _) = dataset.into_parts();
        let num_partitions = partitions.len();

        let partials: Vec<HashMap<String, Row>> = partitions
            .into_par_iter()
            .map(|rows| {
                let mut local: HashMap<String, Row> = HashMap::new();
                for row in rows {
                    let Some(id) = row[id_idx].clone() else {
                        continue;
                    };
                    match local.get_mut(&id) {
                        Some(existing) => merge_row(existing, row),
                        None => {
                            local.insert(id, row);
                        }
                    }
                }
                local
            })
            .collect();

        let mut records: BTreeMap<String, Row> = BTreeMap::new();
        for partial in partials {
            for (id, row) in partial {
                match records.get_mut(&id) {
                    Some(existing) => merge_row(existing, row),
                    None => {
                        records.insert(id, row);
                    }
                }
            }
        }

        let rows: Vec<Row> = records.into_values().collect();
        debug!(rows_before, records = rows.len(), "aggregated rows");
        info!(records = rows.len(), "aggregated to one row per record");

        Ok(Dataset::new(schema, chunk_rows(rows, num_partitions), DataLevel::Record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{row, Schema};
    use crate::output::{ArtifactWriter, OutputFormat};
    use crate::registry::TypeRegistry;
    use tempfile::tempdir;

    fn s(v: &str) -> Cell {
        Some(v.to_string())
    }

    #[test]
    fn test_reducer_prefers_non_empty() {
        assert_eq!(all_but_empty_string(s(""), s("x")), s("x"));
        assert_eq!(all_but_empty_string(s("x"), s("")), s("x"));
        assert_eq!(all_but_empty_string(None, s("")), s(""));
        assert_eq!(all_but_empty_string(s(""), None), s(""));
        assert_eq!(all_but_empty_string(None, None), None);
        assert_eq!(all_but_empty_string(s("a"), s("b")), s("a"));
    }

    #[test]
    fn test_reducer_associative() {
        let values = [None, s(""), s("a"), s("b")];
        for a in &values {
            for b in &values {
                for c in &values {
                    let left = all_but_empty_string(
                        all_but_empty_string(a.clone(), b.clone()),
                        c.clone(),
                    );
                    let right = all_but_empty_string(
                        a.clone(),
                        all_but_empty_string(b.clone(), c.clone()),
                    );
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn test_aggregate_one_row_per_record() {
        let schema = Schema::from_names(["id", "status", "amount"]).unwrap();
        let rows = vec![
            row([Some("2"), Some("open"), None]),
            row([Some("1"), None, Some("")]),
            row([Some("2"), None, Some("12")]),
            row([Some("1"), Some("closed"), Some("5")]),
            row([None, Some("lost"), None]),
        ];
        let ds = Dataset::from_rows(schema, rows, 3).unwrap();

        let mut registry = TypeRegistry::new();
        let dir = tempdir().unwrap();
        let mut artifacts = ArtifactWriter::new(dir.path(), OutputFormat::Csv);
        let mut ctx = StepContext {
            registry: &mut registry,
            artifacts: &mut artifacts,
            write_intermediate: false,
        };

        let out = AggregateRecordsStep::new("id").run(ds, &mut ctx).unwrap();
        assert_eq!(out.level(), DataLevel::Record);
        assert_eq!(out.column("id").unwrap(), vec![s("1"), s("2")]);
        assert_eq!(out.column("status").unwrap(), vec![s("closed"), s("open")]);
        assert_eq!(out.column("amount").unwrap(), vec![s("5"), s("12")]);
    }
}
