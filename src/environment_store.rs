//! Thread-safe in-memory storage for the currently active environment document.
use std::sync::{Arc, RwLock};

use crate::environment::Environment;

/// `EnvironmentStore` provides a thread-safe (`Sync`) storage for the environment document that
/// allows concurrent access for readers and writers.
///
/// The document itself is immutable and can only be replaced completely. Readers receive an
/// `Arc` snapshot that is not affected by further writes, so the read lock is only held for the
/// duration of a pointer clone.
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    environment: RwLock<Option<Arc<Environment>>>,
}

impl EnvironmentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        EnvironmentStore::default()
    }

    /// Get the currently active environment. Returns `None` if no environment has been stored
    /// yet.
    pub fn get_environment(&self) -> Option<Arc<Environment>> {
        // read() returns Err only if a writer panicked while holding the lock. The slot only ever
        // holds a complete value, so reading through the poison is safe.
        let environment = self
            .environment
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        environment.clone()
    }

    /// Replace the active environment.
    ///
    /// Returns `false` (keeping the current environment) if `environment` is older than the
    /// one already stored, so that `updated_at` never moves backwards.
    pub fn set_environment(&self, environment: Environment) -> bool {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(environment);

        let mut slot = self
            .environment
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(current) = slot.as_ref() {
            if new_value.updated_at < current.updated_at {
                log::warn!(target: "flagsmith",
                           current_updated_at:display = current.updated_at,
                           received_updated_at:display = new_value.updated_at;
                           "ignoring environment document older than the active one");
                return false;
            }
        }

        *slot = Some(new_value);
        true
    }
}
