//! Persistence of intermediate snapshots and the final result.
//!
//! ```text
//! <target>/
//! ├── intermediate/
//! │   ├── 01_import_result/            result.csv + _manifest.json
//! │   ├── 02_variables_types/
//! │   └── 03_create_columns_from_json/
//! └── result/                          result.csv + _manifest.json
//! ```
//!
//! The writer owns the snapshot counter: every intermediate artifact takes
//! the next value, so directory names sort in execution order. Counters are
//! not reused within a run. Existing artifact directories are overwritten;
//! [`ArtifactWriter::reset_intermediates`] clears snapshots left by an
//! earlier run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dataset::{DataLevel, Dataset, Field};
use crate::error::ArtifactResult;

const INTERMEDIATE_DIR: &str = "intermediate";
const RESULT_DIR: &str = "result";
const MANIFEST_FILE: &str = "_manifest.json";
const CSV_DELIMITER: u8 = b'|';
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// File format of written datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pipe-delimited text with a header row.
    #[default]
    Csv,
    /// One JSON object per line.
    Json,
}

impl OutputFormat {
    fn file_name(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "result.csv",
            OutputFormat::Json => "result.jsonl",
        }
    }
}

/// Metadata written next to every artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    pub run_id: Uuid,
    /// Snapshot counter; `None` for the final result
    pub counter: Option<u32>,
    pub label: String,
    pub level: DataLevel,
    pub row_count: usize,
    pub columns: Vec<Field>,
    pub written_at: String,
}

/// Writes datasets below a target root and numbers intermediate snapshots.
#[derive(Debug)]
pub struct ArtifactWriter {
    target: PathBuf,
    format: OutputFormat,
    run_id: Uuid,
    counter: u32,
}

impl ArtifactWriter {
    pub fn new(target: impl AsRef<Path>, format: OutputFormat) -> Self {
        Self {
            target: target.as_ref().to_path_buf(),
            format,
            run_id: Uuid::new_v4(),
            counter: 0,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Last counter value handed out (0 before the first snapshot).
    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn next_counter(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    /// Directory name of an intermediate snapshot.
    pub fn intermediate_name(counter: u32, label: &str) -> String {
        format!("{:02}_{}", counter, label)
    }

    /// Remove the `intermediate/` directory of earlier runs.
    pub fn reset_intermediates(&self) -> ArtifactResult<()> {
        let dir = self.target.join(INTERMEDIATE_DIR);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(path = %dir.display(), "removed previous intermediates");
        }
        Ok(())
    }

    /// Persist an intermediate snapshot as `intermediate/NN_<label>/`.
    pub fn write_intermediate(&mut self, label: &str, dataset: &Dataset) -> ArtifactResult<PathBuf> {
        let counter = self.next_counter();
        let dir = self
            .target
            .join(INTERMEDIATE_DIR)
            .join(Self::intermediate_name(counter, label));
        self.write_dir(&dir, Some(counter), label, dataset)?;
        debug!(path = %dir.display(), rows = dataset.row_count(), "wrote intermediate snapshot");
        Ok(dir)
    }

    /// Persist the final dataset as `result/`.
    pub fn write_result(&mut self, dataset: &Dataset) -> ArtifactResult<PathBuf> {
        let dir = self.target.join(RESULT_DIR);
        self.write_dir(&dir, None, RESULT_DIR, dataset)?;
        info!(path = %dir.display(), rows = dataset.row_count(), "wrote result");
        Ok(dir)
    }

    fn write_dir(
        &self,
        dir: &Path,
        counter: Option<u32>,
        label: &str,
        dataset: &Dataset,
    ) -> ArtifactResult<()> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;

        let data_path = dir.join(self.format.file_name());
        match self.format {
            OutputFormat::Csv => write_csv(&data_path, dataset)?,
            OutputFormat::Json => write_json_lines(&data_path, dataset)?,
        }

        let manifest = ArtifactManifest {
            run_id: self.run_id,
            counter,
            label: label.to_string(),
            level: dataset.level(),
            row_count: dataset.row_count(),
            columns: dataset.schema().fields().to_vec(),
            written_at: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }
}

/// Pipe-delimited export. Nulls are written as empty fields and values are
/// written verbatim, whitespace included.
pub fn write_csv(path: &Path, dataset: &Dataset) -> ArtifactResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_path(path)?;

    writer.write_record(dataset.schema().names())?;
    for row in dataset.rows() {
        writer.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

/// One JSON object per row, keyed by column name, nulls kept.
pub fn write_json_lines(path: &Path, dataset: &Dataset) -> ArtifactResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let names: Vec<&str> = dataset.schema().names().collect();

    for row in dataset.rows() {
        let object: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .zip(row)
            .map(|(name, cell)| {
                let value = match cell {
                    Some(v) => serde_json::Value::String(v.clone()),
                    None => serde_json::Value::Null,
                };
                (name.to_string(), value)
            })
            .collect();
        serde_json::to_writer(&mut out, &object)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{row, Schema};
    use tempfile::tempdir;

    fn sample() -> Dataset {
        let schema = Schema::from_names(["id", "text_"]).unwrap();
        Dataset::from_rows(schema, vec![row([Some("1"), Some(" padded ")]), row([Some("2"), None])], 2)
            .unwrap()
    }

    #[test]
    fn test_intermediate_names_are_numbered() {
        let dir = tempdir().unwrap();
        let mut writer = ArtifactWriter::new(dir.path(), OutputFormat::Csv);

        let first = writer.write_intermediate("import_result", &sample()).unwrap();
        let second = writer.write_intermediate("aggregate", &sample()).unwrap();

        assert!(first.ends_with("intermediate/01_import_result"));
        assert!(second.ends_with("intermediate/02_aggregate"));
        assert_eq!(writer.counter(), 2);
    }

    #[test]
    fn test_reset_removes_snapshots_of_earlier_runs() {
        let dir = tempdir().unwrap();
        let mut earlier = ArtifactWriter::new(dir.path(), OutputFormat::Csv);
        for label in ["a", "b", "c"] {
            earlier.write_intermediate(label, &sample()).unwrap();
        }

        let mut writer = ArtifactWriter::new(dir.path(), OutputFormat::Csv);
        writer.reset_intermediates().unwrap();
        writer.write_intermediate("a", &sample()).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join(INTERMEDIATE_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01_a"]);

        // nothing to clear is fine
        let fresh = tempdir().unwrap();
        ArtifactWriter::new(fresh.path(), OutputFormat::Csv)
            .reset_intermediates()
            .unwrap();
    }

    #[test]
    fn test_csv_is_pipe_delimited_and_untrimmed() {
        let dir = tempdir().unwrap();
        let mut writer = ArtifactWriter::new(dir.path(), OutputFormat::Csv);
        let result = writer.write_result(&sample()).unwrap();

        let content = fs::read_to_string(result.join("result.csv")).unwrap();
        assert_eq!(content, "id|text_\n1| padded \n2|\n");
        assert!(result.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_json_lines_keep_nulls() {
        let dir = tempdir().unwrap();
        let mut writer = ArtifactWriter::new(dir.path(), OutputFormat::Json);
        let result = writer.write_result(&sample()).unwrap();

        let content = fs::read_to_string(result.join("result.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["text_"], serde_json::Value::Null);
    }

    #[test]
    fn test_manifest_records_counter() {
        let dir = tempdir().unwrap();
        let mut writer = ArtifactWriter::new(dir.path(), OutputFormat::Csv);
        let path = writer.write_intermediate("step", &sample()).unwrap();

        let manifest: ArtifactManifest =
            serde_json::from_str(&fs::read_to_string(path.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.counter, Some(1));
        assert_eq!(manifest.row_count, 2);
        assert_eq!(manifest.run_id, writer.run_id());
    }
}
