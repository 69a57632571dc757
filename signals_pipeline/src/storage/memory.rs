use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::sync::RwLock;

use super::{
    IoSnafu, NotFoundSnafu, ObjectStore, StorageError, StoreResponse, validate_key,
};

/// In-process bucket. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object directly, bypassing the staging file.
    pub async fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), bytes.into());
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn put(&self, key: &str, local_path: &Path) -> Result<StoreResponse, StorageError> {
        validate_key(key)?;
        let bytes = tokio::fs::read(local_path)
            .await
            .context(IoSnafu { path: local_path })?;
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(StoreResponse::ok())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| NotFoundSnafu { key }.build())
    }

    async fn delete(&self, key: &str) -> Result<StoreResponse, StorageError> {
        validate_key(key)?;
        self.objects.write().await.remove(key);
        Ok(StoreResponse::no_content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryObjectStore::new();
        store.insert("t/b", "1").await;
        store.insert("t/a", "2").await;
        store.insert("u/a", "3").await;

        assert_eq!(store.list("t/").await.unwrap(), vec!["t/a", "t/b"]);
        assert!(store.list("v/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_reads_the_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj");
        tokio::fs::write(&path, b"payload").await.unwrap();

        let store = MemoryObjectStore::new();
        store.put("k/obj", &path).await.unwrap();
        assert_eq!(store.get("k/obj").await.unwrap(), b"payload");
        assert!(matches!(
            store.get("k/other").await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
