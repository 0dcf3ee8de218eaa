//! Flat string-keyed store, the `localStorage` analogue.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{StorageBackend, StorageError, validate_collection};

/// Secondary backend: a single file mapping keys to JSON-serialized blobs.
///
/// The whole file is rewritten on every save, so it is only suitable for
/// small collections. A mutex serializes the read-modify-write cycle between
/// collections sharing the file.
#[derive(Debug)]
pub struct FlatStore {
    path: PathBuf,
    lock: Mutex<()>,
}

type Entries = BTreeMap<String, String>;

impl FlatStore {
    /// Create a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Entries, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FlatStore {
    fn name(&self) -> &'static str {
        "flat"
    }

    async fn save(&self, collection: &str, records: &[Value]) -> Result<(), StorageError> {
        validate_collection(collection)?;
        let blob = serde_json::to_string(records)?;

        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(collection.to_string(), blob);
        self.write_entries(&entries).await
    }

    async fn load(&self, collection: &str) -> Result<Option<Vec<Value>>, StorageError> {
        validate_collection(collection)?;

        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await?;
        entries
            .get(collection)
            .map(|blob| serde_json::from_str(blob))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        validate_collection(collection)?;

        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(collection).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }
}
