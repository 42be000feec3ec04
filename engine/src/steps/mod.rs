//! Pipeline steps.
//!
//! Every step satisfies one contract, [`PipelineStep`]: it consumes the
//! dataset produced by its predecessor and returns the dataset for its
//! successor. Steps may read the [`TypeRegistry`] through broadcast snapshots
//! inside their parallel passes and update it from the driver side between
//! passes.
//!
//! The set of steps is closed: [`StepDefinition`] is the serializable form
//! used in configuration, and [`StepDefinition::build`] turns it into the
//! boxed implementation registered with the runner.
//!
//! | Definition | Step | Data level |
//! |---|---|---|
//! | `variable_types` | [`VariableTypesStep`] | row |
//! | `escalate_types` | [`EscalateTypesStep`] | row |
//! | `add_variable_columns` | [`AddVariableColumnsStep`] | row |
//! | `aggregate_records` | [`AggregateRecordsStep`] | row → record |
//! | `create_columns_from_json` | [`CreateColumnsFromJsonStep`] | any |
//! | `match_categories` | [`MatchCategoriesStep`] | any |

pub mod aggregate;
pub mod categories;
pub mod escalate;
pub mod json_columns;
pub mod pivot;
pub mod variable_types;

pub use aggregate::{all_but_empty_string, AggregateRecordsStep};
pub use categories::{CategoryMatcher, MatchCategoriesStep};
pub use escalate::EscalateTypesStep;
pub use json_columns::CreateColumnsFromJsonStep;
pub use pivot::AddVariableColumnsStep;
pub use variable_types::VariableTypesStep;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::dataset::{ColumnType, DataLevel, Dataset, Schema};
use crate::error::StepResult;
use crate::output::ArtifactWriter;
use crate::registry::{TypeRegistry, VariableMap};

// =============================================================================
// Step contract
// =============================================================================

/// Driver-side state a step may use while it runs.
pub struct StepContext<'a> {
    pub registry: &'a mut TypeRegistry,
    pub artifacts: &'a mut ArtifactWriter,
    pub write_intermediate: bool,
}

impl StepContext<'_> {
    /// Persist a diagnostic table if intermediates are requested.
    pub fn write_diagnostic(&mut self, label: &str, dataset: &Dataset) -> StepResult<()> {
        if self.write_intermediate {
            self.artifacts.write_intermediate(label, dataset)?;
        }
        Ok(())
    }
}

/// A single transformation in the pipeline.
pub trait PipelineStep: Send + Sync {
    /// Name used for logging and intermediate artifact directories.
    fn label(&self) -> &str;

    /// Data level the step requires, `None` if it works on any level.
    fn input_level(&self) -> Option<DataLevel> {
        None
    }

    /// Data level of the step's output given its input level.
    fn output_level(&self, input: DataLevel) -> DataLevel {
        input
    }

    fn run(&self, dataset: Dataset, ctx: &mut StepContext<'_>) -> StepResult<Dataset>;
}

// =============================================================================
// Step definitions (configuration form)
// =============================================================================

fn default_unmatched() -> String {
    categories::DEFAULT_UNMATCHED.to_string()
}

fn default_unknown() -> String {
    categories::DEFAULT_UNKNOWN.to_string()
}

fn default_threshold() -> f64 {
    categories::DEFAULT_THRESHOLD
}

/// Serializable description of a step, as listed in the pipeline config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDefinition {
    /// Count `(variable name, variable type)` occurrences
    VariableTypes,

    /// Collapse observed types into one type per variable
    EscalateTypes,

    /// Pivot variable rows into one column per variable
    AddVariableColumns,

    /// Reduce rows to one row per record identifier
    AggregateRecords,

    /// Flatten JSON values into new columns
    CreateColumnsFromJson,

    /// Fuzzy-match a label column against reference categories
    MatchCategories {
        column: String,
        reference_file: PathBuf,
        rules_file: PathBuf,
        #[serde(default = "default_unmatched")]
        unmatched: String,
        #[serde(default = "default_unknown")]
        unknown: String,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
}

impl StepDefinition {
    /// Instantiate the step, taking column names from the config.
    pub fn build(&self, config: &PipelineConfig) -> Box<dyn PipelineStep> {
        let columns = &config.columns;
        match self {
            StepDefinition::VariableTypes => Box::new(VariableTypesStep::new(
                &columns.variable_name,
                &columns.variable_type,
            )),
            StepDefinition::EscalateTypes => Box::new(EscalateTypesStep::new(
                &columns.variable_name,
                &columns.variable_type,
                config.excluded_variables(),
            )),
            StepDefinition::AddVariableColumns => Box::new(AddVariableColumnsStep::new(
                &columns.variable_name,
                &columns.variable_type,
                columns.value_columns.clone(),
                &columns.default_value,
            )),
            StepDefinition::AggregateRecords => {
                Box::new(AggregateRecordsStep::new(&columns.record_id))
            }
            StepDefinition::CreateColumnsFromJson => Box::new(CreateColumnsFromJsonStep),
            StepDefinition::MatchCategories {
                column,
                reference_file,
                rules_file,
                unmatched,
                unknown,
                threshold,
            } => Box::new(MatchCategoriesStep {
                column: column.clone(),
                reference_file: reference_file.clone(),
                rules_file: rules_file.clone(),
                unmatched: unmatched.clone(),
                unknown: unknown.clone(),
                threshold: *threshold,
            }),
        }
    }
}

/// Two-column `(variable name, variable type)` table of a registry mapping.
pub(crate) fn variable_table(
    variables: &VariableMap,
    name_column: &str,
    type_column: &str,
) -> StepResult<Dataset> {
    let mut schema = Schema::new();
    schema.push(name_column, ColumnType::String)?;
    schema.push(type_column, ColumnType::String)?;
    let rows = variables
        .iter()
        .map(|(name, info)| vec![Some(name.clone()), Some(info.var_type.to_string())])
        .collect();
    Ok(Dataset::from_rows(schema, rows, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_from_json() {
        let json = r#"[
            {"type": "variable_types"},
            {"type": "create_columns_from_json"},
            {"type": "match_categories", "column": "brand", "reference_file": "ref.csv", "rules_file": "rules.csv"}
        ]"#;
        let defs: Vec<StepDefinition> = serde_json::from_str(json).unwrap();
        assert_eq!(defs.len(), 3);
        match &defs[2] {
            StepDefinition::MatchCategories { threshold, unmatched, .. } => {
                assert_eq!(*threshold, 0.4);
                assert_eq!(unmatched, "OTHER");
            }
            other => panic!("unexpected definition {:?}", other),
        }
    }

    #[test]
    fn test_build_labels() {
        let config = PipelineConfig::default();
        let labels: Vec<String> = config
            .steps
            .iter()
            .map(|d| d.build(&config).label().to_string())
            .collect();
        assert_eq!(
            labels,
            vec![
                "variables_types",
                "variables_type_escalation",
                "add_variable_columns",
                "aggregate_to_records",
                "create_columns_from_json",
            ]
        );
    }
}
