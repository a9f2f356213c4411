//! Pull-style metrics registry
//!
//! Components register a name and a closure returning their current state
//! as JSON. Nothing is computed until someone asks for a snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Snapshot function registered by a component
pub type SnapshotFn = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Registry of named snapshot functions
#[derive(Default, Clone)]
pub struct MetricsRegistry {
    entries: Arc<RwLock<BTreeMap<String, SnapshotFn>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the snapshot function for `name`
    pub fn register<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.write().insert(name.clone(), Arc::new(f)).is_some() {
            tracing::debug!(metric = %name, "replaced metric");
        }
    }

    /// Remove a registration; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Snapshot of a single registration
    pub fn get(&self, name: &str) -> Option<serde_json::Value> {
        let f = self.entries.read().get(name).cloned()?;
        Some(f())
    }

    /// Call every registered function and collect the results in one object
    ///
    /// Functions are called outside the lock, so a snapshot function may
    /// itself register or unregister entries.
    pub fn snapshot(&self) -> serde_json::Value {
        let entries: Vec<(String, SnapshotFn)> = self
            .entries
            .read()
            .iter()
            .map(|(k, f)| (k.clone(), Arc::clone(f)))
            .collect();

        let mut out = serde_json::Map::with_capacity(entries.len());
        for (name, f) in entries {
            out.insert(name, f());
        }
        serde_json::Value::Object(out)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
