//! Local persistence with a ranked fallback chain.
//!
//! Collections are saved and loaded as whole units through [`Persistence`],
//! which walks a ranked list of [`StorageBackend`]s:
//!
//! 1. [`DocumentStore`] - one JSON document per collection, records keyed by id
//! 2. [`FlatStore`] - a single string-keyed file of JSON blobs
//! 3. an in-process [`MemoryStore`], always present as the last resort
//!
//! A failing backend is logged and skipped. Callers never see storage errors
//! and never learn which backend served a call; when nothing on disk works,
//! state simply lives in memory until the process exits.

mod document;
mod flat;
mod memory;

pub use document::DocumentStore;
pub use flat::FlatStore;
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors raised by individual backends.
///
/// These never leave this module: [`Persistence`] recovers from them by
/// falling through to the next backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record handed to a keyed store has no usable `id`.
    #[error("record in collection {0} has no id")]
    MissingKey(String),

    /// Collection names double as file names and must stay simple.
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),
}

/// A storage capability: whole-collection save, load and clear.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Replace the full contents of `collection`.
    async fn save(&self, collection: &str, records: &[Value]) -> Result<(), StorageError>;

    /// Load every record of `collection`, or `None` if it was never saved.
    async fn load(&self, collection: &str) -> Result<Option<Vec<Value>>, StorageError>;

    /// Remove `collection` entirely. Clearing a missing collection succeeds.
    async fn clear(&self, collection: &str) -> Result<(), StorageError>;
}

/// Ranked chain of storage backends.
///
/// Cheap to clone; clones share the same backends.
#[derive(Clone)]
pub struct Persistence {
    inner: Arc<PersistenceInner>,
}

struct PersistenceInner {
    backends: Vec<Arc<dyn StorageBackend>>,
    memory: MemoryStore,
    /// Rank of the backend that accepted the latest save of each collection.
    /// The memory store ranks last, at `backends.len()`.
    written: Mutex<HashMap<String, usize>>,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.inner.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("Persistence").field("backends", &names).finish()
    }
}

impl Persistence {
    /// Build a chain from backends in rank order.
    ///
    /// An in-memory store is always appended as the final fallback.
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self {
            inner: Arc::new(PersistenceInner {
                backends,
                memory: MemoryStore::new(),
                written: Mutex::default(),
            }),
        }
    }

    /// The standard on-disk chain rooted at `dir`: documents, then a flat file.
    #[must_use]
    pub fn on_disk(dir: &Path) -> Self {
        Self::new(vec![
            Arc::new(DocumentStore::new(dir.join("documents"))),
            Arc::new(FlatStore::new(dir.join("flat.json"))),
        ])
    }

    /// Memory-only persistence, lost when the process exits.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Vec::new())
    }

    /// Replace the contents of `collection`, using the first backend that accepts the write.
    ///
    /// Every other backend that may still hold an older copy of the
    /// collection is cleared afterwards, so a later load cannot pick up
    /// stale records from a higher-ranked store that refused this write.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn save(&self, collection: &str, records: &[Value]) {
        let mut accepted = None;
        for (rank, backend) in self.inner.backends.iter().enumerate() {
            match backend.save(collection, records).await {
                Ok(()) => {
                    debug!(backend = backend.name(), "Collection saved");
                    accepted = Some(rank);
                    break;
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Storage backend rejected save, falling back");
                }
            }
        }

        let rank = accepted.unwrap_or(self.inner.backends.len());
        if accepted.is_none() {
            if !self.inner.backends.is_empty() {
                warn!("No durable storage available, keeping collection in memory only");
            }
            // The memory store cannot fail.
            let _ = self.inner.memory.save(collection, records).await;
        }

        let previous = self.written_rank(collection);
        self.inner
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string(), rank);

        // Higher-ranked backends refused this write; a lower-ranked one may
        // hold the previous write.
        for (other, backend) in self.inner.backends.iter().enumerate() {
            let stale = other < rank || previous.is_some_and(|prev| other > rank && other <= prev);
            if stale && let Err(e) = backend.clear(collection).await {
                warn!(backend = backend.name(), error = %e, "Could not clear outdated copy of collection");
            }
        }
        if rank < self.inner.backends.len() && previous == Some(self.inner.backends.len()) {
            let _ = self.inner.memory.clear(collection).await;
        }
    }

    /// Load `collection` from the highest-ranked backend that holds it.
    ///
    /// Returns an empty list when no backend has the collection.
    #[instrument(skip(self))]
    pub async fn load(&self, collection: &str) -> Vec<Value> {
        // Start at the backend that took the latest write in this process.
        let start = self.written_rank(collection).unwrap_or(0);
        for backend in self.inner.backends.iter().skip(start) {
            match backend.load(collection).await {
                Ok(Some(records)) => {
                    debug!(backend = backend.name(), records = records.len(), "Collection loaded");
                    return records;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Storage backend failed to load, falling back");
                }
            }
        }

        self.inner
            .memory
            .load(collection)
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Remove `collection` from every backend.
    #[instrument(skip(self))]
    pub async fn clear(&self, collection: &str) {
        self.inner
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(collection);
        for backend in &self.inner.backends {
            if let Err(e) = backend.clear(collection).await {
                warn!(backend = backend.name(), error = %e, "Storage backend failed to clear collection");
            }
        }
        let _ = self.inner.memory.clear(collection).await;
    }

    fn written_rank(&self, collection: &str) -> Option<usize> {
        self.inner
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .copied()
    }

    /// Serialize and save typed records.
    ///
    /// Records that fail to serialize are skipped with a warning.
    pub async fn save_records<T: Serialize + Sync>(&self, collection: &str, records: &[T]) {
        let values: Vec<Value> = records
            .iter()
            .filter_map(|record| match serde_json::to_value(record) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(collection, error = %e, "Skipping record that failed to serialize");
                    None
                }
            })
            .collect();
        self.save(collection, &values).await;
    }

    /// Load and deserialize typed records.
    ///
    /// Records that no longer match `T` are skipped with a warning rather
    /// than failing the whole collection.
    pub async fn load_records<T: DeserializeOwned>(&self, collection: &str) -> Vec<T> {
        self.load(collection)
            .await
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection, error = %e, "Skipping record that failed to deserialize");
                    None
                }
            })
            .collect()
    }
}

/// Check that a collection name is safe to use as a file name or map key.
pub(crate) fn validate_collection(collection: &str) -> Result<(), StorageError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidCollection(collection.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    /// A backend that is never available.
    struct Broken;

    #[async_trait]
    impl StorageBackend for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn save(&self, _: &str, _: &[Value]) -> Result<(), StorageError> {
            Err(std::io::Error::other("quota exceeded").into())
        }

        async fn load(&self, _: &str) -> Result<Option<Vec<Value>>, StorageError> {
            Err(std::io::Error::other("unavailable").into())
        }

        async fn clear(&self, _: &str) -> Result<(), StorageError> {
            Err(std::io::Error::other("unavailable").into())
        }
    }

    /// An in-memory backend whose saves can be made to fail, like a disk
    /// that has run out of quota.
    #[derive(Default)]
    struct Flaky {
        store: MemoryStore,
        full: std::sync::atomic::AtomicBool,
    }

    impl Flaky {
        fn fill_up(&self) {
            self.full.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StorageBackend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn save(&self, collection: &str, records: &[Value]) -> Result<(), StorageError> {
            if self.full.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(std::io::Error::other("quota exceeded").into());
            }
            self.store.save(collection, records).await
        }

        async fn load(&self, collection: &str) -> Result<Option<Vec<Value>>, StorageError> {
            self.store.load(collection).await
        }

        async fn clear(&self, collection: &str) -> Result<(), StorageError> {
            self.store.clear(collection).await
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    #[tokio::test]
    async fn test_falls_back_past_broken_backend() {
        let dir = tempfile::tempdir().unwrap();
        let flat = Arc::new(FlatStore::new(dir.path().join("flat.json")));
        let persistence = Persistence::new(vec![Arc::new(Broken), flat.clone()]);

        persistence.save("notes", &[json!({"id": "a"})]).await;

        assert_eq!(flat.load("notes").await.unwrap(), Some(vec![json!({"id": "a"})]));
        assert_eq!(persistence.load("notes").await, vec![json!({"id": "a"})]);
    }

    #[tokio::test]
    async fn test_refused_save_never_leaves_stale_copy_ahead() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(Flaky::default());
        let backends: Vec<Arc<dyn StorageBackend>> =
            vec![primary.clone(), Arc::new(FlatStore::new(dir.path().join("flat.json")))];
        let persistence = Persistence::new(backends.clone());

        persistence.save("cart", &[json!({"id": "old"})]).await;
        primary.fill_up();
        persistence.save("cart", &[json!({"id": "new"})]).await;

        assert_eq!(persistence.load("cart").await, vec![json!({"id": "new"})]);
        assert_eq!(primary.load("cart").await.unwrap(), None);

        // A fresh chain over the same stores, as after a restart.
        let reopened = Persistence::new(backends);
        assert_eq!(reopened.load("cart").await, vec![json!({"id": "new"})]);
    }

    #[tokio::test]
    async fn test_recovered_primary_supersedes_fallback_copy() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(Flaky::default());
        let flat = Arc::new(FlatStore::new(dir.path().join("flat.json")));
        let persistence = Persistence::new(vec![primary.clone(), flat.clone()]);

        primary.fill_up();
        persistence.save("cart", &[json!({"id": "offline"})]).await;
        primary.full.store(false, std::sync::atomic::Ordering::SeqCst);
        persistence.save("cart", &[json!({"id": "latest"})]).await;

        assert_eq!(persistence.load("cart").await, vec![json!({"id": "latest"})]);
        assert_eq!(flat.load("cart").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_fallback_is_read_before_stale_disk() {
        let primary = Arc::new(Flaky::default());
        let persistence = Persistence::new(vec![primary.clone()]);

        persistence.save("session", &[json!({"id": "v1"})]).await;
        primary.fill_up();
        persistence.save("session", &[json!({"id": "v2"})]).await;

        assert_eq!(persistence.load("session").await, vec![json!({"id": "v2"})]);
    }

    #[tokio::test]
    async fn test_degrades_to_memory_when_everything_fails() {
        let persistence = Persistence::new(vec![Arc::new(Broken), Arc::new(Broken)]);

        persistence.save("notes", &[json!({"id": "a"})]).await;

        assert_eq!(persistence.load("notes").await, vec![json!({"id": "a"})]);
    }

    #[tokio::test]
    async fn test_missing_collection_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::on_disk(dir.path());
        assert!(persistence.load("nothing-here").await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::on_disk(dir.path());
        persistence.save("session", &[json!({"id": "s"})]).await;

        persistence.clear("session").await;

        assert!(persistence.load("session").await.is_empty());
    }

    #[tokio::test]
    async fn test_typed_round_trip_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let notes = vec![
            Note { id: "1".into(), body: "first".into() },
            Note { id: "2".into(), body: "second".into() },
        ];

        Persistence::on_disk(dir.path()).save_records("notes", &notes).await;
        let mut loaded: Vec<Note> = Persistence::on_disk(dir.path()).load_records("notes").await;
        loaded.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(loaded, notes);
    }

    #[tokio::test]
    async fn test_undecodable_records_are_skipped() {
        let persistence = Persistence::in_memory();
        persistence
            .save("notes", &[json!({"id": "1", "body": "ok"}), json!({"id": 2})])
            .await;

        let loaded: Vec<Note> = persistence.load_records("notes").await;
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_collection_names() {
        assert!(validate_collection("dead-letter").is_ok());
        assert!(validate_collection("cart_v2").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("../etc").is_err());
    }
}
