//! Type escalation: one type per variable.
//!
//! The parallel pass collects every type observed per variable name; the
//! driver then escalates each set (see [`VariableType::escalate`]) and
//! publishes the result as [`RegistryKey::EscalatedVariables`].
//! Configured variables keep their configured type. Variables disabled in
//! the configuration are left out.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use super::{variable_table, PipelineStep, StepContext};
use crate::dataset::{DataLevel, Dataset};
use crate::error::{SchemaResult, StepResult};
use crate::registry::{Provenance, RegistryKey, VariableInfo, VariableMap, VariableType};

pub struct EscalateTypesStep {
    name_column: String,
    type_column: String,
    excluded: HashSet<String>,
}

impl EscalateTypesStep {
    pub fn new(name_column: &str, type_column: &str, excluded: HashSet<String>) -> Self {
        Self {
            name_column: name_column.to_string(),
            type_column: type_column.to_string(),
            excluded,
        }
    }

    /// Observed types per variable name. Rows without a name are ignored.
    fn observe(&self, dataset: &Dataset) -> SchemaResult<BTreeMap<String, BTreeSet<String>>> {
        let name_idx = dataset.schema().require(&self.name_column)?;
        let type_idx = dataset.schema().require(&self.type_column)?;

        let observed = dataset
            .partitions()
            .par_iter()
            .map(|rows| {
                let mut local: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
                for row in rows {
                    if let Some(name) = &row[name_idx] {
                        let tag = row[type_idx].clone().unwrap_or_default();
                        local.entry(name.clone()).or_default().insert(tag);
                    }
                }
                local
            })
            .reduce(BTreeMap::new, |mut acc, part| {
                for (name, tags) in part {
                    acc.entry(name).or_default().extend(tags);
                }
                acc
            });
        Ok(observed)
    }
}

impl PipelineStep for EscalateTypesStep {
    fn label(&self) -> &str {
        "variables_type_escalation"
    }

    fn input_level(&self) -> Option<DataLevel> {
        Some(DataLevel::Row)
    }

    fn run(&self, dataset: Dataset, ctx: &mut StepContext<'_>) -> StepResult<Dataset> {
        let observed = self.observe(&dataset)?;
        let configured = ctx.registry.get(RegistryKey::RawVariables);

        let mut escalated: VariableMap = configured
            .iter()
            .filter(|(name, _)| !self.excluded.contains(*name))
            .map(|(name, info)| (name.clone(), info.clone()))
            .collect();

        for (name, tags) in observed {
            if self.excluded.contains(&name) || escalated.contains_key(&name) {
                continue;
            }
            let types: Vec<VariableType> = tags.iter().map(|t| VariableType::parse(t)).collect();
            let var_type = VariableType::escalate(&types);
            if types.len() > 1 {
                debug!(variable = %name, ?tags, escalated = %var_type, "escalated variable type");
            }
            escalated.insert(name, VariableInfo::new(var_type, Provenance::Discovered));
        }

        info!(variables = escalated.len(), "escalated variable types");
        if ctx.write_intermediate {
            let table = variable_table(&escalated, &self.name_column, &self.type_column)?;
            ctx.write_diagnostic("variable_types_escalated", &table)?;
        }
        ctx.registry.set(RegistryKey::EscalatedVariables, escalated);

        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{row, Schema};
    use crate::output::{ArtifactWriter, OutputFormat};
    use crate::registry::TypeRegistry;
    use tempfile::tempdir;

    #[test]
    fn test_escalation_into_registry() {
        let schema = Schema::from_names(["name_", "var_type_"]).unwrap();
        let rows = vec![
            row([Some("amount"), Some("integer")]),
            row([Some("amount"), Some("long")]),
            row([Some("flag"), Some("boolean")]),
            row([Some("flag"), Some("string")]),
            row([Some("secret"), Some("string")]),
            row([Some("fixed"), Some("double")]),
            row([None, Some("string")]),
        ];
        let ds = Dataset::from_rows(schema, rows, 2).unwrap();

        let mut configured = VariableMap::new();
        configured.insert(
            "fixed".into(),
            VariableInfo::new(VariableType::String, Provenance::Configured),
        );
        let mut registry = TypeRegistry::with_raw_variables(configured);
        let dir = tempdir().unwrap();
        let mut artifacts = ArtifactWriter::new(dir.path(), OutputFormat::Csv);
        let mut ctx = StepContext {
            registry: &mut registry,
            artifacts: &mut artifacts,
            write_intermediate: false,
        };

        let step = EscalateTypesStep::new("name_", "var_type_", HashSet::from(["secret".to_string()]));
        let out = step.run(ds.clone(), &mut ctx).unwrap();
        assert_eq!(out, ds);

        let map = registry.get(RegistryKey::EscalatedVariables);
        assert_eq!(map.len(), 3);
        assert_eq!(map["amount"].var_type, VariableType::Long);
        assert_eq!(map["flag"].var_type, VariableType::String);
        assert_eq!(map["fixed"].var_type, VariableType::String);
        assert_eq!(map["fixed"].provenance, Provenance::Configured);
        assert_eq!(map["amount"].provenance, Provenance::Discovered);
        assert!(!map.contains_key("secret"));
    }
}
