//! In-process store; nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{StorageBackend, StorageError};

/// Memory-only backend.
///
/// Used as the implicit last fallback of every [`super::Persistence`] chain
/// and directly in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, collection: &str, records: &[Value]) -> Result<(), StorageError> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string(), records.to_vec());
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<Option<Vec<Value>>, StorageError> {
        Ok(self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned())
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(collection);
        Ok(())
    }
}
