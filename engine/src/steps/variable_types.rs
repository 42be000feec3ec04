//! Occurrence counts of `(variable name, variable type)` pairs.
//!
//! Pure analysis: the dataset passes through unchanged, the counts are
//! logged and persisted as a diagnostic table.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::{PipelineStep, StepContext};
use crate::dataset::{Cell, ColumnType, DataLevel, Dataset, Schema};
use crate::error::{SchemaResult, StepResult};

pub const OCCURRENCES_COLUMN: &str = "occurrences";

/// `(name, type) → count`, ordered by name then type.
pub type Occurrences = BTreeMap<(Cell, Cell), u64>;

/// Count variable name/type pairs across all partitions.
pub fn count_variable_types(
    dataset: &Dataset,
    name_column: &str,
    type_column: &str,
) -> SchemaResult<Occurrences> {
    let name_idx = dataset.schema().require(name_column)?;
    let type_idx = dataset.schema().require(type_column)?;

    let counts = dataset
        .partitions()
        .par_iter()
        .map(|rows| {
            let mut local: HashMap<(Cell, Cell), u64> = HashMap::new();
            for row in rows {
                *local
                    .entry((row[name_idx].clone(), row[type_idx].clone()))
                    .or_default() += 1;
            }
            local
        })
        .reduce(HashMap::new, |mut acc, part| {
            for (key, n) in part {
                *acc.entry(key).or_default() += n;
            }
            acc
        });

    Ok(counts.into_iter().collect())
}

/// Render occurrence counts as a three-column dataset.
pub fn occurrence_table(
    occurrences: &Occurrences,
    name_column: &str,
    type_column: &str,
) -> SchemaResult<Dataset> {
    let mut schema = Schema::new();
    schema.push(name_column, ColumnType::String)?;
    schema.push(type_column, ColumnType::String)?;
    schema.push(OCCURRENCES_COLUMN, ColumnType::Integer)?;

    let rows = occurrences
        .iter()
        .map(|((name, var_type), n)| vec![name.clone(), var_type.clone(), Some(n.to_string())])
        .collect();
    Dataset::from_rows(schema, rows, 1)
}

pub struct VariableTypesStep {
    name_column: String,
    type_column: String,
}

impl VariableTypesStep {
    pub fn new(name_column: &str, type_column: &str) -> Self {
        Self {
            name_column: name_column.to_string(),
            type_column: type_column.to_string(),
        }
    }
}

impl PipelineStep for VariableTypesStep {
    fn label(&self) -> &str {
        "variables_types"
    }

    fn input_level(&self) -> Option<DataLevel> {
        Some(DataLevel::Row)
    }

    fn run(&self, dataset: Dataset, ctx: &mut StepContext<'_>) -> StepResult<Dataset> {
        let occurrences = count_variable_types(&dataset, &self.name_column, &self.type_column)?;
        info!(pairs = occurrences.len(), "counted variable name/type pairs");

        if ctx.write_intermediate {
            let table = occurrence_table(&occurrences, &self.name_column, &self.type_column)?;
            ctx.write_diagnostic("variables_types_occurrences", &table)?;
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::row;

    #[test]
    fn test_counts_across_partitions() {
        let schema = Schema::from_names(["name_", "var_type_"]).unwrap();
        let rows = vec![
            row([Some("amount"), Some("long")]),
            row([Some("amount"), Some("long")]),
            row([Some("amount"), Some("double")]),
            row([Some("status"), Some("string")]),
            row([Some("amount"), Some("long")]),
        ];
        let ds = Dataset::from_rows(schema, rows, 3).unwrap();

        let counts = count_variable_types(&ds, "name_", "var_type_").unwrap();
        let key = |n: &str, t: &str| (Some(n.to_string()), Some(t.to_string()));
        assert_eq!(counts[&key("amount", "long")], 3);
        assert_eq!(counts[&key("amount", "double")], 1);
        assert_eq!(counts[&key("status", "string")], 1);

        let table = occurrence_table(&counts, "name_", "var_type_").unwrap();
        assert_eq!(table.row_count(), 3);
        // ordered by name then type
        assert_eq!(
            table.column("var_type_").unwrap()[0],
            Some("double".to_string())
        );
    }
}
