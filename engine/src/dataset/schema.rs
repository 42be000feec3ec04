//! Ordered dataset schema.
//!
//! The schema is an explicit value carried alongside the rows, never
//! inferred from the first row observed. Column names are unique.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SchemaError, SchemaResult};

/// Value type of a column.
///
/// Cells are always stored as text; the type documents how the text is meant
/// to be read by consumers of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
}

/// A single named column of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered sequence of uniquely named columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a string-typed schema from column names.
    pub fn from_names<I, S>(names: I) -> SchemaResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for name in names {
            schema.push(name, ColumnType::String)?;
        }
        Ok(schema)
    }

    /// Append a column, returning its position.
    ///
    /// Fails with [`SchemaError::DuplicateColumn`] if the name is taken.
    pub fn push(&mut self, name: impl Into<String>, column_type: ColumnType) -> SchemaResult<usize> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(SchemaError::DuplicateColumn(name));
        }
        let position = self.fields.len();
        self.index.insert(name.clone(), position);
        self.fields.push(Field { name, column_type });
        Ok(position)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Position of a column that must exist.
    pub fn require(&self, name: &str) -> SchemaResult<usize> {
        self.index_of(name)
            .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_order() {
        let schema = Schema::from_names(["b", "a", "c"]).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(schema.index_of("a"), Some(1));
        assert_eq!(schema.index_of("z"), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut schema = Schema::from_names(["id", "value"]).unwrap();
        let err = schema.push("value", ColumnType::String).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateColumn("value".into()));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_require_missing() {
        let schema = Schema::from_names(["id"]).unwrap();
        assert_eq!(
            schema.require("proc_inst_id_").unwrap_err(),
            SchemaError::MissingColumn("proc_inst_id_".into())
        );
    }
}
