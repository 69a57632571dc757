//! Object-store boundary used by the partition protocol.
//!
//! Keys are `/`-separated strings. `list` is a plain string-prefix match, so
//! callers that mean "everything under a directory" pass a prefix ending in `/`.

mod local;
mod memory;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::{Backtrace, Snafu};

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

/// Status code returned by a successful `put`.
pub const STATUS_OK: u16 = 200;
/// Status code returned by a successful `delete`.
pub const STATUS_NO_CONTENT: u16 = 204;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Reading or writing the backing files failed.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// `get` was called for a key the store does not hold.
    #[snafu(display("Object not found: {key}"))]
    NotFound { key: String, backtrace: Backtrace },

    /// The key is empty, absolute or escapes the bucket.
    #[snafu(display("Invalid object key: {key:?}"))]
    InvalidKey { key: String, backtrace: Backtrace },
}

/// Minimal response metadata for mutating calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResponse {
    pub status_code: u16,
}

impl StoreResponse {
    pub fn ok() -> Self {
        Self {
            status_code: STATUS_OK,
        }
    }

    pub fn no_content() -> Self {
        Self {
            status_code: STATUS_NO_CONTENT,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Uploads the file at `local_path` under `key`, replacing any existing object.
    async fn put(&self, key: &str, local_path: &Path) -> Result<StoreResponse, StorageError>;

    /// Downloads the object stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes `key`. Deleting a missing key still answers 204.
    async fn delete(&self, key: &str) -> Result<StoreResponse, StorageError>;
}

/// Rejects keys that could not name an object inside a bucket.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let escapes = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if key.is_empty() || key.starts_with('/') || escapes {
        return InvalidKeySnafu { key }.fail();
    }
    Ok(())
}
