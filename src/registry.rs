use eyre::Result;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor for a configured component. Receives the full raw block,
/// including its `type` field.
pub type Builder<T> = Arc<dyn Fn(&Value) -> Result<T> + Send + Sync>;

/// Maps a type discriminator to the constructor for that type.
///
/// Safe to share between threads: registration takes a write lock, resolution
/// clones the builder out under a read lock and runs it outside the lock.
pub struct Registry<T> {
    name: &'static str,
    builders: RwLock<HashMap<String, Builder<T>>>,
}

impl<T> Registry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// What this registry builds ("collector", "notifier", ...).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stores a builder under `kind`. Replaces any existing builder for that kind.
    pub fn register<F>(&self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        let kind = kind.into();
        let previous = self.builders.write().insert(kind.clone(), Arc::new(builder));
        if previous.is_some() {
            tracing::debug!("{} builder `{}` replaced", self.name, kind);
        }
    }

    /// Builds a component of type `kind`.
    ///
    /// Returns `Ok(None)` when nothing is registered under `kind`; the caller
    /// decides how fatal that is. Builder errors (bad type-specific config)
    /// come back as `Err`.
    pub fn resolve(&self, kind: &str, raw: &Value) -> Result<Option<T>> {
        let builder = self.builders.read().get(kind).cloned();
        match builder {
            Some(build) => build(raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.read().contains_key(kind)
    }

    /// Registered type names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.builders.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
