//! Partitioned, string-typed working dataset.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Schema: [id, name_, text_]   │
//! ├──────────────┬───────────────┤
//! │ partition 0  │ partition 1   │   rows are Vec<Option<String>>
//! │ [7, a, x]    │ [8, a, null]  │   aligned with the schema
//! └──────────────┴───────────────┘
//! ```
//!
//! Every row of every partition has exactly one cell per schema column.
//! Partitions are the unit of data-parallel work inside a step.

mod schema;

pub use schema::{ColumnType, Field, Schema};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SchemaError, SchemaResult};

/// A single cell. `None` is a null value.
pub type Cell = Option<String>;

/// One row, aligned with the dataset schema.
pub type Row = Vec<Cell>;

/// Granularity of the rows in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataLevel {
    /// One row per variable event (key/value layout).
    #[default]
    Row,
    /// One row per record identifier.
    Record,
}

impl fmt::Display for DataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLevel::Row => write!(f, "row"),
            DataLevel::Record => write!(f, "record"),
        }
    }
}

// =============================================================================
// Dataset
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    schema: Schema,
    partitions: Vec<Vec<Row>>,
    level: DataLevel,
}

impl Dataset {
    /// Assemble a dataset, checking that every row matches the schema width.
    pub fn new(schema: Schema, partitions: Vec<Vec<Row>>, level: DataLevel) -> SchemaResult<Self> {
        let expected = schema.len();
        if let Some(row) = partitions.iter().flatten().find(|r| r.len() != expected) {
            return Err(SchemaError::RowWidth {
                expected,
                actual: row.len(),
            });
        }
        Ok(Self {
            schema,
            partitions,
            level,
        })
    }

    /// Build a row-level dataset, splitting `rows` into `partitions` chunks.
    pub fn from_rows(schema: Schema, rows: Vec<Row>, partitions: usize) -> SchemaResult<Self> {
        Self::new(schema, chunk_rows(rows, partitions), DataLevel::Row)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn partitions(&self) -> &[Vec<Row>] {
        &self.partitions
    }

    pub fn level(&self) -> DataLevel {
        self.level
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    /// All rows in partition order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.partitions.iter().flatten()
    }

    pub fn into_parts(self) -> (Schema, Vec<Vec<Row>>, DataLevel) {
        (self.schema, self.partitions, self.level)
    }

    /// Cells of one column in row order.
    pub fn column(&self, name: &str) -> SchemaResult<Vec<Cell>> {
        let idx = self.schema.require(name)?;
        Ok(self.rows().map(|r| r[idx].clone()).collect())
    }

    /// Redistribute rows into `partitions` contiguous chunks, keeping order.
    pub fn repartition(self, partitions: usize) -> Self {
        let rows: Vec<Row> = self.partitions.into_iter().flatten().collect();
        Self {
            schema: self.schema,
            partitions: chunk_rows(rows, partitions),
            level: self.level,
        }
    }
}

/// Split rows into `n` contiguous chunks of near-equal size.
///
/// Always yields at least one (possibly empty) partition.
pub fn chunk_rows(rows: Vec<Row>, n: usize) -> Vec<Vec<Row>> {
    let n = n.max(1);
    let chunk_size = rows.len().div_ceil(n).max(1);
    let mut partitions: Vec<Vec<Row>> = Vec::with_capacity(n);
    let mut current = Vec::with_capacity(chunk_size);
    for row in rows {
        current.push(row);
        if current.len() == chunk_size {
            partitions.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() || partitions.is_empty() {
        partitions.push(current);
    }
    partitions
}

/// Shorthand used by tests and fixtures: build a row from string literals.
pub fn row<const N: usize>(cells: [Option<&str>; N]) -> Row {
    cells.iter().map(|c| c.map(str::to_string)).collect()
}
