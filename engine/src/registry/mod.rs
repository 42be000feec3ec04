//! Type Registry - replicated `variable name → variable type` mappings.
//!
//! ```text
//!            driver (single writer)
//!   ┌──────────────────────────────────────┐
//!   │ TypeRegistry                         │
//!   │   RawVariables       → Arc<Map>      │── broadcast() ──┐
//!   │   EscalatedVariables → Arc<Map>      │                 │ Arc clone
//!   └──────────────────────────────────────┘                 ▼
//!          ▲  put / set between passes         workers read Broadcast<Map>
//!          └──────── new names returned by the step ─────────┘
//! ```
//!
//! Workers only ever hold a [`Broadcast`] snapshot. Writes need
//! `&mut TypeRegistry`, which only the driver owns, so a mutation can never
//! race a reader: `put` copies the map (copy-on-write) and the next
//! `broadcast` hands out the new version while older snapshots stay valid.

mod types;

pub use types::{Provenance, VariableInfo, VariableType};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// Variable name → variable info, ordered by name.
pub type VariableMap = BTreeMap<String, VariableInfo>;

/// Named mappings held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    /// Variables as configured/observed before type escalation.
    RawVariables,
    /// One escalated type per variable; extended by JSON column discovery.
    EscalatedVariables,
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKey::RawVariables => write!(f, "raw_variables"),
            RegistryKey::EscalatedVariables => write!(f, "escalated_variables"),
        }
    }
}

/// Read-only snapshot of a registry mapping, shared with workers.
#[derive(Debug, Clone)]
pub struct Broadcast<T> {
    value: Arc<T>,
}

impl<T> Broadcast<T> {
    fn new(value: Arc<T>) -> Self {
        Self { value }
    }
}

impl<T> Deref for Broadcast<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Driver-side store of all named variable mappings.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    maps: HashMap<RegistryKey, Arc<VariableMap>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose `RawVariables` mapping is seeded from configuration.
    pub fn with_raw_variables(variables: VariableMap) -> Self {
        let mut registry = Self::new();
        registry.set(RegistryKey::RawVariables, variables);
        registry
    }

    /// Immutable snapshot of a mapping (empty if never set).
    pub fn get(&self, key: RegistryKey) -> Arc<VariableMap> {
        self.maps.get(&key).cloned().unwrap_or_default()
    }

    /// Replace a mapping wholesale.
    pub fn set(&mut self, key: RegistryKey, mapping: VariableMap) {
        debug!(registry = %key, variables = mapping.len(), "registry mapping replaced");
        self.maps.insert(key, Arc::new(mapping));
    }

    /// Add a variable or escalate the type of an existing one.
    ///
    /// Entries are never removed. A configured entry keeps its provenance.
    pub fn put(&mut self, key: RegistryKey, name: impl Into<String>, info: VariableInfo) {
        let name = name.into();
        let map = Arc::make_mut(self.maps.entry(key).or_default());
        match map.get_mut(&name) {
            Some(existing) => {
                existing.var_type = info.var_type;
                if existing.provenance != Provenance::Configured {
                    existing.provenance = info.provenance;
                }
            }
            None => {
                map.insert(name, info);
            }
        }
    }

    /// Hand out the current version of a mapping for the duration of a step.
    pub fn broadcast(&self, key: RegistryKey) -> Broadcast<VariableMap> {
        Broadcast::new(self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(t: VariableType) -> VariableInfo {
        VariableInfo::new(t, Provenance::Configured)
    }

    #[test]
    fn test_get_unset_is_empty() {
        let registry = TypeRegistry::new();
        assert!(registry.get(RegistryKey::EscalatedVariables).is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let mut registry = TypeRegistry::new();
        registry.put(RegistryKey::RawVariables, "amount", configured(VariableType::Long));
        assert_eq!(registry.get(RegistryKey::RawVariables).len(), 1);
        assert!(registry.get(RegistryKey::EscalatedVariables).is_empty());
    }

    #[test]
    fn test_broadcast_snapshot_is_stable() {
        let mut registry = TypeRegistry::new();
        registry.put(RegistryKey::EscalatedVariables, "a", configured(VariableType::String));
        let snapshot = registry.broadcast(RegistryKey::EscalatedVariables);

        registry.put(
            RegistryKey::EscalatedVariables,
            "a_b",
            VariableInfo::discovered_string(),
        );

        // The earlier snapshot does not observe the driver's later write.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.broadcast(RegistryKey::EscalatedVariables).len(), 2);
    }

    #[test]
    fn test_put_escalates_and_keeps_provenance() {
        let mut registry = TypeRegistry::new();
        registry.put(RegistryKey::EscalatedVariables, "x", configured(VariableType::Long));
        registry.put(
            RegistryKey::EscalatedVariables,
            "x",
            VariableInfo::new(VariableType::String, Provenance::Discovered),
        );

        let map = registry.get(RegistryKey::EscalatedVariables);
        assert_eq!(map["x"].var_type, VariableType::String);
        assert_eq!(map["x"].provenance, Provenance::Configured);
    }

    #[test]
    fn test_broadcast_is_send_to_workers() {
        let mut registry = TypeRegistry::new();
        registry.put(RegistryKey::EscalatedVariables, "a", configured(VariableType::String));
        let snapshot = registry.broadcast(RegistryKey::EscalatedVariables);

        let handle = std::thread::spawn(move || snapshot.contains_key("a"));
        assert!(handle.join().unwrap());
    }
}
