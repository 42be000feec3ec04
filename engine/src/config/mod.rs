//! Pipeline configuration - column names, known variables, ordered steps.
//!
//! Stored as a single JSON file. Missing fields fall back to the defaults of
//! the common process-variable export layout (`proc_inst_id_`, `name_`,
//! `var_type_`, `text_`/`long_`/`double_`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::output::OutputFormat;
use crate::registry::{Provenance, VariableInfo, VariableMap, VariableType};
use crate::steps::StepDefinition;

const DEFAULT_PARTITIONS: usize = 4;

/// Names of the columns the steps read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    /// Record identifier; rows are filtered and aggregated on it.
    pub record_id: String,
    /// Variable name of a key/value row.
    pub variable_name: String,
    /// Variable type tag of a key/value row.
    pub variable_type: String,
    /// Variable type tag → column holding the value for that type.
    pub value_columns: BTreeMap<String, String>,
    /// Value column for types not listed in `value_columns`.
    pub default_value: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        let value_columns = [
            ("string", "text_"),
            ("boolean", "long_"),
            ("short", "long_"),
            ("integer", "long_"),
            ("long", "long_"),
            ("date", "long_"),
            ("double", "double_"),
        ]
        .into_iter()
        .map(|(t, c)| (t.to_string(), c.to_string()))
        .collect();

        Self {
            record_id: "proc_inst_id_".to_string(),
            variable_name: "name_".to_string(),
            variable_type: "var_type_".to_string(),
            value_columns,
            default_value: "text_".to_string(),
        }
    }
}

/// A variable known before the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfiguration {
    pub variable_name: String,
    pub variable_type: VariableType,
    /// `false` excludes the variable from escalation and pivoting.
    #[serde(default = "default_true")]
    pub use_variable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnNames,
    /// Number of partitions the imported data is split into.
    pub partitions: usize,
    pub output_format: OutputFormat,
    pub variables: Vec<VariableConfiguration>,
    /// Steps in execution order.
    pub steps: Vec<StepDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            partitions: DEFAULT_PARTITIONS,
            output_format: OutputFormat::default(),
            variables: Vec::new(),
            steps: vec![
                StepDefinition::VariableTypes,
                StepDefinition::EscalateTypes,
                StepDefinition::AddVariableColumns,
                StepDefinition::AggregateRecords,
                StepDefinition::CreateColumnsFromJson,
            ],
            updated_at: None,
        }
    }
}

impl PipelineConfig {
    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("partitions must be at least 1".into()));
        }
        let columns = [
            ("record_id", &self.columns.record_id),
            ("variable_name", &self.columns.variable_name),
            ("variable_type", &self.columns.variable_type),
            ("default_value", &self.columns.default_value),
        ];
        if let Some((field, _)) = columns.iter().find(|(_, name)| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("column name {} is empty", field)));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.variables.iter().find(|v| !seen.insert(&v.variable_name)) {
            return Err(ConfigError::Invalid(format!(
                "variable {} configured twice",
                dup.variable_name
            )));
        }
        Ok(())
    }

    /// Enabled variables, seeded into the registry as configured.
    pub fn raw_variables(&self) -> VariableMap {
        self.variables
            .iter()
            .filter(|v| v.use_variable)
            .map(|v| {
                (
                    v.variable_name.clone(),
                    VariableInfo::new(v.variable_type.clone(), Provenance::Configured),
                )
            })
            .collect()
    }

    /// Names of disabled variables.
    pub fn excluded_variables(&self) -> HashSet<String> {
        self.variables
            .iter()
            .filter(|v| !v.use_variable)
            .map(|v| v.variable_name.clone())
            .collect()
    }

    /// Append every discovered variable not configured yet.
    ///
    /// Returns how many entries were added.
    pub fn with_discovered(&mut self, variables: &VariableMap) -> usize {
        let known: HashSet<String> = self.variables.iter().map(|v| v.variable_name.clone()).collect();
        let before = self.variables.len();
        self.variables.extend(
            variables
                .iter()
                .filter(|(name, info)| {
                    info.provenance == Provenance::Discovered && !known.contains(*name)
                })
                .map(|(name, info)| VariableConfiguration {
                    variable_name: name.clone(),
                    variable_type: info.var_type.clone(),
                    use_variable: true,
                    comment: None,
                }),
        );
        self.variables.len() - before
    }
}

// =============================================================================
// Store
// =============================================================================

/// Reads and writes a [`PipelineConfig`] file.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the config file.
    pub fn load(&self) -> ConfigResult<PipelineConfig> {
        let content = fs::read_to_string(&self.path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!(
            path = %self.path.display(),
            variables = config.variables.len(),
            steps = config.steps.len(),
            "loaded pipeline config"
        );
        Ok(config)
    }

    /// Load the config file, or the defaults if it does not exist.
    pub fn load_or_default(&self) -> ConfigResult<PipelineConfig> {
        if self.path.exists() {
            self.load()
        } else {
            Ok(PipelineConfig::default())
        }
    }

    /// Write the config, stamping `updated_at`.
    pub fn save(&self, config: &PipelineConfig) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut stamped = config.clone();
        stamped.updated_at = Some(chrono::Utc::now().to_rfc3339());
        fs::write(&self.path, serde_json::to_string_pretty(&stamped)?)?;
        info!(path = %self.path.display(), "saved pipeline config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn variable(name: &str, t: VariableType, used: bool) -> VariableConfiguration {
        VariableConfiguration {
            variable_name: name.to_string(),
            variable_type: t,
            use_variable: used,
            comment: None,
        }
    }

    #[test]
    fn test_defaults_from_partial_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"columns": {"record_id": "case_id"}, "partitions": 2}"#).unwrap();
        assert_eq!(config.columns.record_id, "case_id");
        assert_eq!(config.columns.variable_name, "name_");
        assert_eq!(config.columns.value_columns["double"], "double_");
        assert_eq!(config.partitions, 2);
        assert_eq!(config.steps.len(), 5);
    }

    #[test]
    fn test_variable_type_tags() {
        let json = r#"{"variables": [
            {"variable_name": "amount", "variable_type": "long"},
            {"variable_name": "payload", "variable_type": "json", "use_variable": false, "comment": "raw"}
        ]}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.variables[0].variable_type, VariableType::Long);
        assert!(config.variables[0].use_variable);
        assert_eq!(config.variables[1].variable_type, VariableType::Other("json".into()));
    }

    #[test]
    fn test_raw_and_excluded_variables() {
        let config = PipelineConfig {
            variables: vec![
                variable("amount", VariableType::Long, true),
                variable("secret", VariableType::String, false),
            ],
            ..Default::default()
        };
        let raw = config.raw_variables();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw["amount"].provenance, Provenance::Configured);
        assert_eq!(config.excluded_variables(), HashSet::from(["secret".to_string()]));
    }

    #[test]
    fn test_with_discovered_appends_new_only() {
        let mut config = PipelineConfig {
            variables: vec![variable("amount", VariableType::Long, true)],
            ..Default::default()
        };
        let mut found = VariableMap::new();
        found.insert("amount".into(), VariableInfo::new(VariableType::Long, Provenance::Configured));
        found.insert("payload_a".into(), VariableInfo::discovered_string());

        assert_eq!(config.with_discovered(&found), 1);
        assert_eq!(config.with_discovered(&found), 0);
        assert_eq!(config.variables[1].variable_name, "payload_a");
    }

    #[test]
    fn test_validate() {
        let config = PipelineConfig {
            partitions: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = PipelineConfig {
            variables: vec![
                variable("a", VariableType::Long, true),
                variable("a", VariableType::String, false),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("pipeline.json"));
        assert_eq!(store.load_or_default().unwrap(), PipelineConfig::default());

        let config = PipelineConfig {
            variables: vec![variable("amount", VariableType::Double, true)],
            ..Default::default()
        };
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.updated_at.is_some());
        assert_eq!(loaded.variables, config.variables);
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ConfigStore::new(&path).load(), Err(ConfigError::Json(_))));
    }
}
