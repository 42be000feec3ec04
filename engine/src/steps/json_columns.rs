//! Schema discovery & materialization of JSON-valued variable columns.
//!
//! ```text
//!        partitions (parallel)             driver                 rows (parallel)
//!  ┌──────────────────────────┐   ┌─────────────────────┐   ┌──────────────────────┐
//!  │ 1. discover              │   │ 2. extend schema    │   │ 3. materialize       │
//!  │ parse variable cells,    │──▶│ merge distinct names│──▶│ re-parse, fill every │
//!  │ emit column_field names  │   │ sort, append or     │   │ discovered column or │
//!  │                          │   │ reuse variable cols │   │ null, then registry  │
//!  └──────────────────────────┘   └─────────────────────┘   └──────────────────────┘
//!                                 ▲ barrier: every partition merged first
//! ```
//!
//! Only first-level scalar fields are flattened (`value` holding
//! `{"a":"x","b":{"c":1}}` yields `value_a` only). A cell that is null, not
//! JSON, or JSON but not a non-empty object is simply not expandable.

use rayon::prelude::*;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use super::{variable_table, PipelineStep, StepContext};
use crate::dataset::{ColumnType, Dataset, Row, Schema};
use crate::error::{SchemaResult, StepResult};
use crate::registry::{RegistryKey, VariableInfo, VariableMap};

// =============================================================================
// Parsing
// =============================================================================

/// Parse a cell as a JSON object with at least one field.
fn parse_object(cell: Option<&str>) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(cell?) {
        Ok(Value::Object(fields)) if !fields.is_empty() => Some(fields),
        _ => None,
    }
}

/// Text of a scalar JSON value; `None` for objects and arrays.
///
/// A JSON `null` field is still a scalar: it is discovered as a column but
/// materializes as a null cell, not as the text `"null"`. A field that is
/// `null` in every row therefore yields an all-null column.
fn scalar_text(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Object(_) | Value::Array(_) => None,
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        Value::Bool(b) => Some(Some(b.to_string())),
        Value::Number(n) => Some(Some(n.to_string())),
    }
}

fn flattened_name(column: &str, field: &str) -> String {
    format!("{}_{}", column, field)
}

/// Columns of the schema that hold variables eligible for flattening, in
/// schema order.
pub fn eligible_columns(schema: &Schema, variables: &VariableMap) -> Vec<(usize, String)> {
    schema
        .names()
        .enumerate()
        .filter(|(_, name)| {
            variables
                .get(*name)
                .is_some_and(|info| info.var_type.is_flattenable())
        })
        .map(|(idx, name)| (idx, name.to_string()))
        .collect()
}

// =============================================================================
// Pass 1: discovery
// =============================================================================

/// Global distinct set of flattened column names, sorted.
///
/// Each partition is scanned independently; the reduction is the barrier
/// that must complete before materialization starts.
pub fn discover_columns(dataset: &Dataset, eligible: &[(usize, String)]) -> BTreeSet<String> {
    dataset
        .partitions()
        .par_iter()
        .map(|rows| {
            let mut found = BTreeSet::new();
            for row in rows {
                for (idx, column) in eligible {
                    let Some(fields) = parse_object(row[*idx].as_deref()) else {
                        continue;
                    };
                    for (field, value) in &fields {
                        if scalar_text(value).is_some() {
                            found.insert(flattened_name(column, field));
                        }
                    }
                }
            }
            found
        })
        .reduce(BTreeSet::new, |mut acc, part| {
            acc.extend(part);
            acc
        })
}

// =============================================================================
// Pass 3: materialization
// =============================================================================

/// Outcome of the materialization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub dataset: Dataset,
    /// Fields seen while materializing that discovery did not report.
    pub inconsistencies: usize,
}

/// Append `discovered` to the schema and fill the new columns row by row.
///
/// A discovered name that already is a column of a known variable (for
/// example one configured from a previous run's write-back) is filled in
/// place: rows with the field overwrite the cell, other rows keep it. A
/// collision with any other column is a schema invariant violation.
pub fn materialize_columns(
    dataset: Dataset,
    eligible: &[(usize, String)],
    discovered: &[String],
    variables: &VariableMap,
) -> SchemaResult<Materialized> {
    let (mut schema, partitions, level) = dataset.into_parts();

    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(discovered.len());
    for name in discovered {
        let position = match schema.index_of(name) {
            Some(existing) if variables.contains_key(name) => {
                debug!(column = %name, "filling existing variable column");
                existing
            }
            _ => schema.push(name.clone(), ColumnType::String)?,
        };
        positions.insert(name.as_str(), position);
    }
    let width = schema.len();
    let inconsistencies = AtomicUsize::new(0);

    let partitions: Vec<Vec<Row>> = partitions
        .into_par_iter()
        .map(|rows| {
            rows.into_iter()
                .map(|mut row| {
                    row.resize(width, None);
                    for (idx, column) in eligible {
                        let Some(fields) = parse_object(row[*idx].as_deref()) else {
                            continue;
                        };
                        for (field, value) in &fields {
                            let Some(text) = scalar_text(value) else {
                                continue;
                            };
                            let name = flattened_name(column, field);
                            match positions.get(name.as_str()) {
                                Some(&position) => row[position] = text,
                                None => {
                                    warn!(column = %name, "field found in json was not discovered in the previous pass");
                                    inconsistencies.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    }
                    row
                })
                .collect()
        })
        .collect();

    Ok(Materialized {
        dataset: Dataset::new(schema, partitions, level)?,
        inconsistencies: inconsistencies.into_inner(),
    })
}

// =============================================================================
// Step
// =============================================================================

pub struct CreateColumnsFromJsonStep;

impl PipelineStep for CreateColumnsFromJsonStep {
    fn label(&self) -> &str {
        "create_columns_from_json"
    }

    fn run(&self, dataset: Dataset, ctx: &mut StepContext<'_>) -> StepResult<Dataset> {
        let variables = ctx.registry.broadcast(RegistryKey::EscalatedVariables);
        let eligible = eligible_columns(dataset.schema(), &variables);
        let rows_before = dataset.row_count();
        debug!(columns = eligible.len(), "scanning variable columns for json");

        let discovered: Vec<String> = discover_columns(&dataset, &eligible).into_iter().collect();
        let materialized = materialize_columns(dataset, &eligible, &discovered, &variables)?;

        for name in &discovered {
            ctx.registry.put(
                RegistryKey::EscalatedVariables,
                name.clone(),
                VariableInfo::discovered_string(),
            );
        }
        if materialized.inconsistencies > 0 {
            warn!(
                count = materialized.inconsistencies,
                "json parsing differed between discovery and materialization"
            );
        }

        info!(
            found = discovered.len(),
            rows_before,
            rows_after = materialized.dataset.row_count(),
            "found additional variables during json processing"
        );
        debug!(columns = ?discovered, "discovered json columns");

        if ctx.write_intermediate {
            let escalated = ctx.registry.get(RegistryKey::EscalatedVariables);
            let table = variable_table(&escalated, "variable_name", "variable_type")?;
            ctx.write_diagnostic("variable_types_after_json", &table)?;
        }

        Ok(materialized.dataset)
    }
}
