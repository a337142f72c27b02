//! Runtime configuration reader
//!
//! A flat, namespace-scoped string store. Services read their own namespace
//! and apply their own defaults; the host only transports the values.

use crate::FxIndexMap;

/// Namespace-keyed configuration values (`"namespace.key" -> value`).
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    entries: FxIndexMap<String, String>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, namespace: &str, key: &str, value: impl Into<String>) {
        self.entries
            .insert(format!("{}.{}", namespace, key), value.into());
    }

    pub fn with(mut self, namespace: &str, key: &str, value: impl Into<String>) -> Self {
        self.set(namespace, key, value);
        self
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<&str> {
        self.entries
            .get(&format!("{}.{}", namespace, key))
            .map(String::as_str)
    }
}
