//! Structured store: one JSON document per collection, keyed by record id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::{StorageBackend, StorageError, validate_collection};

/// Primary backend, the durable structured store.
///
/// Each collection lives in `<root>/<collection>.json` as an array of
/// records. Every record must carry an `id`; saving two records with the same
/// id keeps the later one in the earlier one's position. Writes go to a
/// temporary file which is then renamed over the document, so a crash never
/// leaves a half-written collection behind.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at `root`. The directory is created on first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the collection documents.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.json"))
    }
}

/// Key a record by its `id` field.
fn record_key(collection: &str, record: &Value) -> Result<String, StorageError> {
    match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(StorageError::MissingKey(collection.to_string())),
    }
}

#[async_trait]
impl StorageBackend for DocumentStore {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn save(&self, collection: &str, records: &[Value]) -> Result<(), StorageError> {
        validate_collection(collection)?;

        let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
        let mut keyed: Vec<&Value> = Vec::with_capacity(records.len());
        for record in records {
            let key = record_key(collection, record)?;
            if let Some(&pos) = positions.get(&key) {
                if let Some(slot) = keyed.get_mut(pos) {
                    *slot = record;
                }
            } else {
                positions.insert(key, keyed.len());
                keyed.push(record);
            }
        }

        let bytes = serde_json::to_vec(&keyed)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.document_path(collection);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<Option<Vec<Value>>, StorageError> {
        validate_collection(collection)?;

        match tokio::fs::read(self.document_path(collection)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        validate_collection(collection)?;

        match tokio::fs::remove_file(self.document_path(collection)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_save_replaces_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        store.save("cart", &[json!({"id": "a"}), json!({"id": "b"})]).await.unwrap();
        store.save("cart", &[json!({"id": "c"})]).await.unwrap();

        assert_eq!(store.load("cart").await.unwrap(), Some(vec![json!({"id": "c"})]));
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        store
            .save(
                "cart",
                &[json!({"id": "a", "v": 1}), json!({"id": "b"}), json!({"id": "a", "v": 2})],
            )
            .await
            .unwrap();

        let loaded = store.load("cart").await.unwrap().unwrap();
        assert_eq!(loaded, vec![json!({"id": "a", "v": 2}), json!({"id": "b"})]);
    }

    #[tokio::test]
    async fn test_records_without_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        let err = store.save("cart", &[json!({"name": "x"})]).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingKey(_)));
    }

    #[tokio::test]
    async fn test_unusable_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"not a directory").unwrap();
        let store = DocumentStore::new(&file);

        assert!(store.save("cart", &[json!({"id": "a"})]).await.is_err());
        assert!(store.load("cart").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        store.clear("cart").await.unwrap();
        assert_eq!(store.load("cart").await.unwrap(), None);
    }
}
