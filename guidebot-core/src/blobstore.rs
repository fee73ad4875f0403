//! Blob storage for application state.
//!
//! All persistent state (vector index, chunk metadata, chat histories, audit
//! logs, uploaded originals) lives behind the [`BlobStore`] trait, keyed by
//! slash-separated string paths. [`FsBlobStore`] maps keys onto a directory
//! tree and writes atomically (temp file + rename) so a crash mid-write never
//! leaves a half-written blob. [`MemoryBlobStore`] backs tests.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;

/// Serialized flat vector index.
pub const VECTOR_INDEX_KEY: &str = "vector_db/vector.index";
/// Chunk metadata parallel to the index, as a JSON array.
pub const METADATA_KEY: &str = "vector_db/metadata.json";
/// Registered users, as a JSON map keyed by user id.
pub const USERS_KEY: &str = "app_data/users.json";
/// Append-only upload audit log.
pub const UPLOAD_LOG_KEY: &str = "app_logs/upload_log.json";
/// Append-only token usage log.
pub const USAGE_LOG_KEY: &str = "app_logs/usage_log.json";

/// Key for a user's conversation archive.
pub fn history_key(user_id: &str) -> String {
    format!("chat_histories/{}_history.json", safe_component(user_id))
}

/// Key for an uploaded original, prefixed with an ingest timestamp so repeated
/// uploads of the same file never collide.
pub fn original_key(stamp: &str, file_name: &str) -> String {
    format!("uploaded_originals/{}_{}", stamp, safe_component(file_name))
}

/// Make a string safe to use as a single path component.
fn safe_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Abstract blob storage keyed by slash-separated string paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob. Returns `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a blob, creating or replacing it.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Whether a blob exists under this key.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Remove a blob. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed blob store rooted at a data directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty() && *s != "..") {
            path.push(segment);
        }
        path
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let write_err = |e: std::io::Error| StorageError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        // Write to a temp sibling, then rename into place.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(write_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .map_err(|e| StorageError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted. Lets tests assert on side effects.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.lock().unwrap().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Read and deserialize a JSON blob. Returns `Ok(None)` when the key is
/// missing, `Err` on read or parse failure.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidJson {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Read a JSON blob, falling back to `T::default()` when the key is missing,
/// unreadable, or corrupt. Failures are logged, never propagated; loading state
/// must not take the assistant down.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(
    store: &dyn BlobStore,
    key: &str,
) -> T {
    match load_json(store, key).await {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to load JSON blob, using default");
            T::default()
        }
    }
}

/// Serialize a value as pretty-printed JSON and write it.
pub async fn save_json<T: Serialize>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::InvalidJson {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.put(key, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("vector_db/metadata.json", b"[]").await.unwrap();
        let bytes = store.get("vector_db/metadata.json").await.unwrap();
        assert_eq!(bytes, Some(b"[]".to_vec()));
        assert!(store.exists("vector_db/metadata.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_store_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert_eq!(store.get("nope/missing.json").await.unwrap(), None);
        assert!(!store.exists("nope/missing.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_store_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("app_logs/usage_log.json", b"first").await.unwrap();
        store.put("app_logs/usage_log.json", b"second").await.unwrap();
        let bytes = store.get("app_logs/usage_log.json").await.unwrap().unwrap();
        assert_eq!(bytes, b"second");

        // The temp sibling must not linger after the rename.
        let log_dir = dir.path().join("app_logs");
        let leftovers: Vec<_> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(leftovers, vec!["usage_log.json".to_string()]);
    }

    #[tokio::test]
    async fn test_fs_store_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.delete("vector_db/vector.index").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("../escape.txt", b"x").await.unwrap();
        assert!(dir.path().join("escape.txt").exists());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryBlobStore::new();
        store.put("a/b", b"payload").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Some(b"payload".to_vec()));
        store.delete("a/b").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_json_or_default_on_corrupt_blob() {
        let store = MemoryBlobStore::new();
        store.put("app_logs/usage_log.json", b"{not json").await.unwrap();

        let entries: Vec<u32> = load_json_or_default(&store, "app_logs/usage_log.json").await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_load_json_strict_reports_corrupt_blob() {
        let store = MemoryBlobStore::new();
        store.put("vector_db/metadata.json", b"[1,").await.unwrap();

        let result: Result<Option<Vec<u32>>, _> =
            load_json(&store, "vector_db/metadata.json").await;
        assert!(matches!(result, Err(StorageError::InvalidJson { .. })));
    }

    #[tokio::test]
    async fn test_save_json_pretty_prints() {
        let store = MemoryBlobStore::new();
        save_json(&store, "app_data/users.json", &vec![1, 2, 3])
            .await
            .unwrap();
        let bytes = store.get("app_data/users.json").await.unwrap().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_history_key_sanitizes_user_id() {
        assert_eq!(history_key("alice"), "chat_histories/alice_history.json");
        assert_eq!(
            history_key("../../etc/passwd"),
            "chat_histories/.._.._etc_passwd_history.json"
        );
    }

    #[test]
    fn test_original_key_format() {
        assert_eq!(
            original_key("20260823141530", "SOP-017 rev2.pdf"),
            "uploaded_originals/20260823141530_SOP-017 rev2.pdf"
        );
    }
}
