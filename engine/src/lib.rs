//! # Recordshape - schema discovery for key/value variable exports
//!
//! Recordshape turns tables with one row per variable event (record id,
//! variable name, variable type, typed value columns) into one wide row per
//! record, and expands JSON-valued variables into new scalar columns whose
//! names are only known after scanning the data.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────────────┐     ┌─────────────┐
//! │   CSV File  │────▶│   Import    │────▶│     Pipeline Runner      │────▶│   result/   │
//! │  (ISO/UTF8) │     │ dedup+filter│     │ types → escalate → pivot │     │  (| or json)│
//! └─────────────┘     └─────────────┘     │ → aggregate → json cols  │     └─────────────┘
//!                                         └────────────┬─────────────┘
//!                                                      │ broadcast / put
//!                                               ┌──────▼──────┐
//!                                               │TypeRegistry │
//!                                               └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use recordshape::{run_pipeline, PipelineConfig, RunOptions};
//! use std::path::Path;
//!
//! let outcome = run_pipeline(
//!     Path::new("variables.csv"),
//!     &PipelineConfig::default(),
//!     &RunOptions::new("out"),
//! )?;
//! println!("{} records, {} columns", outcome.rows, outcome.columns.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`dataset`] - Ordered schema and partitioned rows
//! - [`registry`] - Variable type registry with broadcast snapshots
//! - [`parser`] - CSV import with encoding/delimiter detection
//! - [`normalize`] - Column deduplication and record filtering
//! - [`config`] - Pipeline configuration
//! - [`output`] - Intermediate and result artifacts
//! - [`steps`] - Pipeline steps
//! - [`pipeline`] - Step runner and end-to-end driver

// Core modules
pub mod dataset;
pub mod error;
pub mod registry;

// Import
pub mod normalize;
pub mod parser;

// Processing
pub mod config;
pub mod pipeline;
pub mod steps;

// Persistence
pub mod output;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ArtifactError, ConfigError, ImportError, PipelineError, ReferenceError, SchemaError,
    StepError,
};

// =============================================================================
// Re-exports - Data model
// =============================================================================

pub use dataset::{Cell, ColumnType, DataLevel, Dataset, Field, Row, Schema};
pub use registry::{
    Broadcast, Provenance, RegistryKey, TypeRegistry, VariableInfo, VariableMap, VariableType,
};

// =============================================================================
// Re-exports - Import & normalization
// =============================================================================

pub use normalize::{dedup_columns, filter_empty_records};
pub use parser::{
    decode_content, detect_delimiter, detect_encoding, import_bytes, import_file, ImportOptions,
    ImportedCsv,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use config::{ColumnNames, ConfigStore, PipelineConfig, VariableConfiguration};
pub use output::{ArtifactWriter, OutputFormat};
pub use pipeline::{
    discover_variables, run_pipeline, PipelineOutcome, PipelineRunner, RunOptions, RunnerState,
};
pub use steps::{CategoryMatcher, PipelineStep, StepContext, StepDefinition};
