//! Column normalization applied right after import.
//!
//! - [`dedup_columns`] collapses `name_`, `name_3`, `name_7` style duplicates
//!   back into a single canonical `name_` column.
//! - [`filter_empty_records`] drops ingestion artifacts without an identifier.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::dataset::{Dataset, Row, Schema};
use crate::error::SchemaResult;

/// `name_` optionally followed by the column index added at import.
static SUFFIXED_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+_)\d*$").expect("static pattern is valid")
});

/// Canonical name of a column: its `\w+_` prefix, or `None` if the column
/// does not follow the suffix pattern.
fn canonical_prefix(column: &str) -> Option<&str> {
    SUFFIXED_COLUMN
        .captures(column)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Keep one physical column per canonical prefix.
///
/// The first occurrence in column order is kept and renamed to the prefix,
/// later ones are dropped. Columns not matching the pattern pass through.
/// If no prefix is shared by two columns the dataset is returned unchanged,
/// so running this twice is the same as running it once.
pub fn dedup_columns(dataset: Dataset) -> SchemaResult<Dataset> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut has_duplicates = false;
    for name in dataset.schema().names() {
        if let Some(prefix) = canonical_prefix(name) {
            if !seen.insert(prefix) {
                has_duplicates = true;
                break;
            }
        }
    }
    if !has_duplicates {
        debug!("no duplicated columns");
        return Ok(dataset);
    }

    // (source index, output name) for each surviving column
    let mut kept: Vec<(usize, String)> = Vec::new();
    let mut prefixes: HashSet<String> = HashSet::new();
    for (idx, name) in dataset.schema().names().enumerate() {
        match canonical_prefix(name) {
            Some(prefix) => {
                if prefixes.insert(prefix.to_string()) {
                    kept.push((idx, prefix.to_string()));
                }
            }
            None => kept.push((idx, name.to_string())),
        }
    }

    let dropped = dataset.schema().len() - kept.len();
    let mut schema = Schema::new();
    for (idx, name) in &kept {
        schema.push(name.clone(), dataset.schema().fields()[*idx].column_type)?;
    }

    let (_, partitions, level) = dataset.into_parts();
    let partitions: Vec<Vec<Row>> = partitions
        .into_par_iter()
        .map(|rows| {
            rows.into_iter()
                .map(|mut row| kept.iter().map(|(idx, _)| row[*idx].take()).collect::<Row>())
                .collect()
        })
        .collect();

    info!(dropped, columns = schema.len(), "removed duplicated columns");
    Dataset::new(schema, partitions, level)
}

/// Whether an identifier cell denotes a real record.
pub fn is_valid_identifier(cell: Option<&str>) -> bool {
    matches!(cell, Some(v) if !v.is_empty() && v != "null")
}

/// Drop rows whose identifier is null, empty or the literal `"null"`.
pub fn filter_empty_records(dataset: Dataset, id_column: &str) -> SchemaResult<Dataset> {
    let idx = dataset.schema().require(id_column)?;
    let before = dataset.row_count();

    let (schema, partitions, level) = dataset.into_parts();
    let partitions: Vec<_> = partitions
        .into_par_iter()
        .map(|rows| {
            rows.into_iter()
                .filter(|row| is_valid_identifier(row[idx].as_deref()))
                .collect::<Vec<_>>()
        })
        .collect();

    let dataset = Dataset::new(schema, partitions, level)?;
    debug!(
        removed = before - dataset.row_count(),
        remaining = dataset.row_count(),
        "filtered rows without identifier"
    );
    Ok(dataset)
}
