use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::ResultExt;
use tracing::debug;

use super::{
    IoSnafu, NotFoundSnafu, ObjectStore, StorageError, StoreResponse, validate_key,
};

/// A bucket backed by a local directory. Each key maps to a file below `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }
}

/// Walks `dir` and appends every file as a `/`-joined key relative to `root`.
fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Only walk the directory that can contain matches.
        let dir_part = prefix.rsplit_once('/').map_or("", |(dir, _)| dir);
        let start = dir_part
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part));
        let root = self.root.clone();
        let prefix = prefix.to_string();

        let walk_dir = start.clone();
        let mut keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            collect_keys(&root, &walk_dir, &mut keys).map(|_| keys)
        })
        .await
        .map_err(std::io::Error::other)
        .context(IoSnafu { path: start.clone() })?
        .context(IoSnafu { path: start })?;

        keys.retain(|key| key.starts_with(&prefix));
        keys.sort();
        Ok(keys)
    }

    async fn put(&self, key: &str, local_path: &Path) -> Result<StoreResponse, StorageError> {
        let target = self.path_for(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(IoSnafu { path: parent })?;
        }
        tokio::fs::copy(local_path, &target)
            .await
            .context(IoSnafu { path: local_path })?;
        debug!(key, path = %target.display(), "Stored object");
        Ok(StoreResponse::ok())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                NotFoundSnafu { key }.fail()
            }
            Err(err) => Err(err).context(IoSnafu { path }),
        }
    }

    async fn delete(&self, key: &str) -> Result<StoreResponse, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).context(IoSnafu { path }),
        }
        Ok(StoreResponse::no_content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{STATUS_NO_CONTENT, STATUS_OK};

    async fn staged_file(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn put_list_get_delete() {
        let bucket = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(bucket.path());

        let file = staged_file(staging.path(), "a.parquet", b"abc").await;
        let put = store.put("raw/2022/3/1/a.parquet", &file).await.unwrap();
        assert_eq!(put.status_code, STATUS_OK);

        assert_eq!(
            store.list("raw/2022/3/1/").await.unwrap(),
            vec!["raw/2022/3/1/a.parquet".to_string()]
        );
        assert_eq!(store.get("raw/2022/3/1/a.parquet").await.unwrap(), b"abc");

        let deleted = store.delete("raw/2022/3/1/a.parquet").await.unwrap();
        assert_eq!(deleted.status_code, STATUS_NO_CONTENT);
        assert!(store.list("raw/2022/3/1/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_does_not_cross_sibling_days() {
        let bucket = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(bucket.path());
        let file = staged_file(staging.path(), "x", b"x").await;

        store.put("raw/2022/3/1/x.parquet", &file).await.unwrap();
        store.put("raw/2022/3/10/x.parquet", &file).await.unwrap();

        assert_eq!(store.list("raw/2022/3/1/").await.unwrap().len(), 1);
        assert_eq!(store.list("raw/2022/3/1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_objects() {
        let bucket = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(bucket.path());

        assert!(store.list("nothing/here/").await.unwrap().is_empty());
        assert!(matches!(
            store.get("nothing/here.csv").await,
            Err(StorageError::NotFound { .. })
        ));
        assert_eq!(
            store.delete("nothing/here.csv").await.unwrap().status_code,
            STATUS_NO_CONTENT
        );
    }
}
