//! Pivot key/value rows into one column per variable.
//!
//! ```text
//! id | name_  | var_type_ | text_ | long_        id | ... | amount | status
//! 7  | status | string    | open  |        →     7  | ... | null   | open
//! 7  | amount | long      |       | 12           7  | ... | 12     | null
//! ```
//!
//! Each row's value is read from the value column configured for the row's
//! own type tag, so rows of a variable whose type was widened still find
//! their value. Rows without a type tag use the variable's escalated type.
//! Unconfigured tags fall back to the default value column.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use super::{PipelineStep, StepContext};
use crate::dataset::{ColumnType, DataLevel, Dataset, Row, Schema};
use crate::error::StepResult;
use crate::registry::{RegistryKey, VariableType};

pub struct AddVariableColumnsStep {
    name_column: String,
    type_column: String,
    value_columns: BTreeMap<String, String>,
    default_value_column: String,
}

/// Resolved positions of the value columns.
struct ValueSources {
    by_type: HashMap<String, Option<usize>>,
    default: Option<usize>,
}

impl ValueSources {
    fn resolve(&self, var_type: &str) -> Option<usize> {
        self.by_type.get(var_type).copied().unwrap_or(self.default)
    }
}

impl AddVariableColumnsStep {
    pub fn new(
        name_column: &str,
        type_column: &str,
        value_columns: BTreeMap<String, String>,
        default_value_column: &str,
    ) -> Self {
        Self {
            name_column: name_column.to_string(),
            type_column: type_column.to_string(),
            value_columns,
            default_value_column: default_value_column.to_string(),
        }
    }

    fn sources(&self, schema: &Schema) -> ValueSources {
        let locate = |column: &str| {
            let idx = schema.index_of(column);
            if idx.is_none() {
                warn!(column, "value column missing, its values stay null");
            }
            idx
        };
        ValueSources {
            by_type: self
                .value_columns
                .iter()
                .map(|(var_type, column)| (var_type.clone(), locate(column.as_str())))
                .collect(),
            default: locate(self.default_value_column.as_str()),
        }
    }
}

impl PipelineStep for AddVariableColumnsStep {
    fn label(&self) -> &str {
        "add_variable_columns"
    }

    fn input_level(&self) -> Option<DataLevel> {
        Some(DataLevel::Row)
    }

    fn run(&self, dataset: Dataset, ctx: &mut StepContext<'_>) -> StepResult<Dataset> {
        let variables = ctx.registry.broadcast(RegistryKey::EscalatedVariables);
        let name_idx = dataset.schema().require(&self.name_column)?;
        let type_idx = dataset.schema().require(&self.type_column)?;

        let (mut schema, partitions, level) = dataset.into_parts();
        let base_width = schema.len();
        let sources = self.sources(&schema);

        // variable name → (new column position, source for untagged rows)
        let mut plan: HashMap<String, (usize, Option<usize>)> = HashMap::new();
        for (name, info) in variables.iter() {
            let fallback = sources.resolve(info.var_type.as_str());
            let position = schema.push(name.clone(), ColumnType::String)?;
            plan.insert(name.clone(), (position, fallback));
        }
        let width = schema.len();

        let partitions: Vec<Vec<Row>> = partitions
            .into_par_iter()
            .map(|rows| {
                rows.into_iter()
                    .map(|mut row| {
                        row.resize(width, None);
                        let target = row[name_idx].as_deref().and_then(|n| plan.get(n));
                        if let Some(&(position, fallback)) = target {
                            let source = match row[type_idx].as_deref() {
                                Some(tag) => sources.resolve(VariableType::parse(tag).as_str()),
                                None => fallback,
                            };
                            if let Some(source) = source {
                                row[position] = row[source].clone();
                            }
                        }
                        row
                    })
                    .collect()
            })
            .collect();

        info!(added = width - base_width, "added variable columns");
        Ok(Dataset::new(schema, partitions, level)?)
    }
}
