//! Variable type tags and escalation rules.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Variable Type
// =============================================================================

/// Declared or inferred type of a variable.
///
/// Known tags are parsed case-insensitively; anything else is kept verbatim
/// in [`VariableType::Other`] (e.g. `json`, `object`, `serializable`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableType {
    Null,
    Boolean,
    Short,
    Integer,
    Long,
    Double,
    Date,
    String,
    Other(String),
}

impl VariableType {
    /// Parse a type tag as it appears in the variable type column.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "" | "null" => Self::Null,
            "boolean" | "bool" => Self::Boolean,
            "short" => Self::Short,
            "integer" | "int" => Self::Integer,
            "long" => Self::Long,
            "double" | "float" => Self::Double,
            "date" => Self::Date,
            "string" => Self::String,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Short => "short",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::Date => "date",
            Self::String => "string",
            Self::Other(tag) => tag,
        }
    }

    /// Width of numeric types; `None` for everything else.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            Self::Short => Some(0),
            Self::Integer => Some(1),
            Self::Long => Some(2),
            Self::Double => Some(3),
            _ => None,
        }
    }

    /// Whether values of this type may carry embedded JSON objects.
    pub fn is_flattenable(&self) -> bool {
        matches!(self, Self::String | Self::Other(_))
    }

    /// Collapse every type observed for one variable into a single type.
    ///
    /// `null` observations are ignored. Identical types stay as they are,
    /// purely numeric mixes widen to the widest numeric type, and any other
    /// mix becomes `string`. No observation at all yields `null`.
    pub fn escalate<'a, I>(observed: I) -> Self
    where
        I: IntoIterator<Item = &'a VariableType>,
    {
        let mut result: Option<VariableType> = None;
        for t in observed {
            if *t == Self::Null {
                continue;
            }
            result = Some(match result {
                None => t.clone(),
                Some(current) if current == *t => current,
                Some(current) => match (current.numeric_rank(), t.numeric_rank()) {
                    (Some(a), Some(b)) if a >= b => current,
                    (Some(_), Some(_)) => t.clone(),
                    _ => Self::String,
                },
            });
        }
        result.unwrap_or(Self::Null)
    }
}

impl From<String> for VariableType {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<&str> for VariableType {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl From<VariableType> for String {
    fn from(t: VariableType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Variable Info
// =============================================================================

/// Where a registry entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Present in the initial configuration.
    Configured,
    /// Found while processing (type escalation or JSON flattening).
    Discovered,
}

/// Registry entry for one variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub var_type: VariableType,
    pub provenance: Provenance,
}

impl VariableInfo {
    pub fn new(var_type: VariableType, provenance: Provenance) -> Self {
        Self {
            var_type,
            provenance,
        }
    }

    /// Entry for a column produced by JSON flattening.
    pub fn discovered_string() -> Self {
        Self::new(VariableType::String, Provenance::Discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn esc(tags: &[&str]) -> VariableType {
        let types: Vec<VariableType> = tags.iter().map(|t| VariableType::parse(t)).collect();
        VariableType::escalate(&types)
    }

    #[test]
    fn test_parse_known_and_other() {
        assert_eq!(VariableType::parse("Long"), VariableType::Long);
        assert_eq!(VariableType::parse("string"), VariableType::String);
        assert_eq!(VariableType::parse("json"), VariableType::Other("json".into()));
        assert_eq!(VariableType::parse(""), VariableType::Null);
    }

    #[test]
    fn test_escalate_identical() {
        assert_eq!(esc(&["boolean", "boolean"]), VariableType::Boolean);
    }

    #[test]
    fn test_escalate_numeric_widens() {
        assert_eq!(esc(&["integer", "long", "short"]), VariableType::Long);
        assert_eq!(esc(&["long", "double"]), VariableType::Double);
    }

    #[test]
    fn test_escalate_mixed_to_string() {
        assert_eq!(esc(&["long", "boolean"]), VariableType::String);
        assert_eq!(esc(&["date", "string"]), VariableType::String);
    }

    #[test]
    fn test_escalate_ignores_null() {
        assert_eq!(esc(&["null", "double", "null"]), VariableType::Double);
        assert_eq!(esc(&["null"]), VariableType::Null);
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&VariableType::Long).unwrap();
        assert_eq!(json, "\"long\"");
        let back: VariableType = serde_json::from_str("\"serializable\"").unwrap();
        assert_eq!(back, VariableType::Other("serializable".into()));
        assert!(back.is_flattenable());
        assert!(!VariableType::Double.is_flattenable());
    }
}
