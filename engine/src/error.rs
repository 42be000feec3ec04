//! Error types for the recordshape pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ImportError`] - CSV import errors
//! - [`SchemaError`] - Schema invariant violations (always fatal)
//! - [`ReferenceError`] - External reference data that cannot be read
//! - [`ConfigError`] - Configuration loading/saving errors
//! - [`ArtifactError`] - Intermediate/result persistence errors
//! - [`StepError`] - Errors raised by a single pipeline step
//! - [`PipelineError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Import Errors
// =============================================================================

/// Errors during CSV import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Failed to read file.
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid CSV content.
    #[error("Invalid CSV at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// Empty file.
    #[error("CSV input is empty")]
    EmptyFile,
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Violations of the dataset schema invariants.
///
/// These are never expected in a correct run and abort the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A column was appended under a name the schema already holds.
    #[error("Duplicate column in schema: {0}")]
    DuplicateColumn(String),

    /// A required column is not part of the schema.
    #[error("Missing column in schema: {0}")]
    MissingColumn(String),

    /// A row does not have one cell per schema column.
    #[error("Row has {actual} cells but schema has {expected} columns")]
    RowWidth { expected: usize, actual: usize },
}

// =============================================================================
// Reference Data Errors
// =============================================================================

/// Errors reading external reference tables.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The reference file could not be opened or read.
    #[error("Cannot read reference file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors loading or saving the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error.
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Semantically invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Artifact Errors
// =============================================================================

/// Errors persisting datasets to the target directory.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// IO error.
    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[error("Artifact CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error.
    #[error("Artifact JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Step Errors
// =============================================================================

/// Errors raised while a pipeline step runs.
#[derive(Debug, Error)]
pub enum StepError {
    /// Schema invariant violation.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Reference data could not be loaded.
    #[error("Reference data error: {0}")]
    Reference(#[from] ReferenceError),

    /// Persisting a diagnostic artifact failed.
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by [`crate::pipeline::PipelineRunner::run`]
/// and [`crate::pipeline::run_pipeline`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step failed; carries the failing step's identity.
    #[error("Step {index} ({label}) failed: {source}")]
    Step {
        index: usize,
        label: String,
        #[source]
        source: StepError,
    },

    /// Steps were registered in an order their data levels do not allow.
    #[error("Step {index} ({label}) expects {expected} data but receives {actual} data")]
    Ordering {
        index: usize,
        label: String,
        expected: String,
        actual: String,
    },

    /// Import error.
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Schema error outside of a step (normalization).
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Config error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Artifact error outside of a step (result writing).
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Result type for step operations.
pub type StepResult<T> = Result<T, StepError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // SchemaError -> StepError
        let step_err: StepError = SchemaError::DuplicateColumn("value_a".into()).into();
        assert!(step_err.to_string().contains("value_a"));

        // StepError -> PipelineError carries the step identity
        let pipeline_err = PipelineError::Step {
            index: 2,
            label: "create_columns_from_json".into(),
            source: step_err,
        };
        let msg = pipeline_err.to_string();
        assert!(msg.contains("Step 2"));
        assert!(msg.contains("create_columns_from_json"));
        assert!(msg.contains("value_a"));
    }

    #[test]
    fn test_reference_error_names_path() {
        let err = ReferenceError::Unreadable {
            path: PathBuf::from("/tmp/categories.csv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/tmp/categories.csv"));
    }
}
