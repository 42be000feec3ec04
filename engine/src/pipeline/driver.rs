//! End-to-end driver: import, normalize, run the configured steps, write.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use super::PipelineRunner;
use crate::config::{ConfigStore, PipelineConfig};
use crate::dataset::Dataset;
use crate::error::PipelineResult;
use crate::normalize::{dedup_columns, filter_empty_records};
use crate::output::{ArtifactWriter, OutputFormat};
use crate::parser::{import_file, ImportOptions};
use crate::registry::{Provenance, RegistryKey, TypeRegistry, VariableMap};
use crate::steps::StepDefinition;

/// Options of a single pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root directory for intermediate and result artifacts.
    pub target: PathBuf,
    /// Persist the output of every stage under `intermediate/`.
    pub write_intermediate: bool,
    /// Save the config, extended by discovered variables, to this path.
    pub write_config: Option<PathBuf>,
    /// Overrides the format from the config.
    pub format: Option<OutputFormat>,
    /// Overrides delimiter detection.
    pub delimiter: Option<char>,
}

impl RunOptions {
    pub fn new(target: impl AsRef<Path>) -> Self {
        Self {
            target: target.as_ref().to_path_buf(),
            write_intermediate: false,
            write_config: None,
            format: None,
            delimiter: None,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    pub result_path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    /// Variables found while processing that were not configured.
    pub discovered_variables: usize,
    pub intermediates: u32,
}

/// Import `input` and bring it into a canonical rectangular shape.
fn import_normalized(
    input: &Path,
    config: &PipelineConfig,
    delimiter: Option<char>,
    artifacts: Option<&mut ArtifactWriter>,
) -> PipelineResult<Dataset> {
    let options = ImportOptions {
        delimiter,
        partitions: config.partitions,
    };
    let imported = import_file(input, &options)?;

    let mut artifacts = artifacts;
    if let Some(writer) = artifacts.as_deref_mut() {
        writer.write_intermediate("import_result", &imported.dataset)?;
    }

    let dataset = dedup_columns(imported.dataset)?;
    let dataset = filter_empty_records(dataset, &config.columns.record_id)?;

    if let Some(writer) = artifacts {
        writer.write_intermediate("import_unique_columns_result", &dataset)?;
    }
    Ok(dataset)
}

/// Run the configured pipeline over a CSV file and write the result.
pub fn run_pipeline(
    input: &Path,
    config: &PipelineConfig,
    options: &RunOptions,
) -> PipelineResult<PipelineOutcome> {
    config.validate()?;
    let format = options.format.unwrap_or(config.output_format);
    let mut artifacts = ArtifactWriter::new(&options.target, format);
    info!(run_id = %artifacts.run_id(), input = %input.display(), "starting pipeline");
    if options.write_intermediate {
        artifacts.reset_intermediates()?;
    }

    let dataset = import_normalized(
        input,
        config,
        options.delimiter,
        options.write_intermediate.then_some(&mut artifacts),
    )?;

    let mut registry = TypeRegistry::with_raw_variables(config.raw_variables());
    let mut runner = PipelineRunner::from_definitions(&config.steps, config);
    let dataset = runner.run(
        dataset,
        &mut registry,
        &mut artifacts,
        options.write_intermediate,
    )?;

    let result_path = artifacts.write_result(&dataset)?;

    let escalated = registry.get(RegistryKey::EscalatedVariables);
    let discovered_variables = escalated
        .values()
        .filter(|info| info.provenance == Provenance::Discovered)
        .count();

    if let Some(path) = &options.write_config {
        let mut updated = config.clone();
        let added = updated.with_discovered(&escalated);
        ConfigStore::new(path).save(&updated)?;
        info!(added, path = %path.display(), "config updated with discovered variables");
    }

    let outcome = PipelineOutcome {
        run_id: artifacts.run_id(),
        result_path,
        rows: dataset.row_count(),
        columns: dataset.schema().names().map(str::to_string).collect(),
        discovered_variables,
        intermediates: artifacts.counter(),
    };
    info!(
        rows = outcome.rows,
        columns = outcome.columns.len(),
        discovered = discovered_variables,
        "pipeline finished"
    );
    Ok(outcome)
}

/// Import and escalate variable types without pivoting or writing results.
pub fn discover_variables(
    input: &Path,
    config: &PipelineConfig,
    delimiter: Option<char>,
) -> PipelineResult<VariableMap> {
    config.validate()?;
    let dataset = import_normalized(input, config, delimiter, None)?;

    let mut registry = TypeRegistry::with_raw_variables(config.raw_variables());
    let definitions = [StepDefinition::VariableTypes, StepDefinition::EscalateTypes];
    let mut runner = PipelineRunner::from_definitions(&definitions, config);
    // Nothing is written: the target is never touched with intermediates off.
    let mut artifacts = ArtifactWriter::new(std::env::temp_dir(), OutputFormat::default());
    runner.run(dataset, &mut registry, &mut artifacts, false)?;

    Ok(registry.get(RegistryKey::EscalatedVariables).as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariableConfiguration;
    use crate::registry::VariableType;
    use std::fs;
    use tempfile::tempdir;

    const INPUT: &str = "\
proc_inst_id_,name_,var_type_,text_,long_,double_,name_
p1,status,string,open,,,status
p1,amount,long,,12,,amount
p1,payload,string,\"{\"\"a\"\":\"\"x\"\",\"\"b\"\":{\"\"c\"\":1}}\",,,payload
p2,status,string,closed,,,status
p2,amount,integer,,7,,amount
null,status,string,lost,,,status
,amount,long,,99,,amount
";

    fn write_input(dir: &Path) -> PathBuf {
        let path = dir.join("variables.csv");
        fs::write(&path, INPUT).unwrap();
        path
    }

    #[test]
    fn test_run_pipeline_end_to_end() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path());
        let mut options = RunOptions::new(dir.path().join("out"));
        options.write_intermediate = true;
        options.write_config = Some(dir.path().join("config.json"));

        let outcome = run_pipeline(&input, &PipelineConfig::default(), &options).unwrap();
        assert_eq!(outcome.rows, 2);
        assert!(outcome.columns.contains(&"payload_a".to_string()));
        assert!(!outcome.columns.contains(&"payload_b".to_string()));
        assert!(!outcome.columns.contains(&"name_6".to_string()));
        assert_eq!(outcome.discovered_variables, 4);

        let result = fs::read_to_string(outcome.result_path.join("result.csv")).unwrap();
        let header: Vec<&str> = result.lines().next().unwrap().split('|').collect();
        let p1: Vec<&str> = result.lines().nth(1).unwrap().split('|').collect();
        let col = |name: &str| header.iter().position(|h| *h == name).unwrap();
        assert_eq!(p1[col("proc_inst_id_")], "p1");
        assert_eq!(p1[col("status")], "open");
        assert_eq!(p1[col("amount")], "12");
        assert_eq!(p1[col("payload_a")], "x");

        let intermediate = dir.path().join("out").join("intermediate");
        assert!(intermediate.join("01_import_result").exists());
        assert!(intermediate.join("02_import_unique_columns_result").exists());

        let saved = ConfigStore::new(dir.path().join("config.json")).load().unwrap();
        let names: Vec<&str> = saved.variables.iter().map(|v| v.variable_name.as_str()).collect();
        assert_eq!(names, vec!["amount", "payload", "payload_a", "status"]);
    }

    #[test]
    fn test_discover_variables() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path());
        let config = PipelineConfig {
            variables: vec![VariableConfiguration {
                variable_name: "payload".into(),
                variable_type: VariableType::Other("json".into()),
                use_variable: false,
                comment: None,
            }],
            ..Default::default()
        };

        let variables = discover_variables(&input, &config, None).unwrap();
        assert_eq!(variables.len(), 2);
        assert_eq!(variables["amount"].var_type, VariableType::Long);
        assert_eq!(variables["status"].var_type, VariableType::String);
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempdir().unwrap();
        let options = RunOptions::new(dir.path());
        assert!(run_pipeline(&dir.path().join("absent.csv"), &PipelineConfig::default(), &options).is_err());
    }
}
