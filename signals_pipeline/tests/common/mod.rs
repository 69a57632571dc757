#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use signals_pipeline::storage::{MemoryObjectStore, ObjectStore, StorageError, StoreResponse};

/// Memory store that records mutating calls and can refuse to delete keys.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryObjectStore,
    sticky: HashSet<String>,
    pub deletes: Mutex<Vec<String>>,
    pub puts: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes of `key` answer 204 but leave the object in place.
    pub fn with_sticky(mut self, key: &str) -> Self {
        self.sticky.insert(key.to_string());
        self
    }

    pub fn deletes(&self) -> Vec<String> {
        let mut keys = self.deletes.lock().unwrap().clone();
        keys.sort();
        keys
    }

    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }

    async fn put(&self, key: &str, local_path: &Path) -> Result<StoreResponse, StorageError> {
        self.puts.lock().unwrap().push(key.to_string());
        self.inner.put(key, local_path).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<StoreResponse, StorageError> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.sticky.contains(key) {
            return Ok(StoreResponse::no_content());
        }
        self.inner.delete(key).await
    }
}

/// Chart payload with one sample per `(unix timestamp, close)` pair, quoted
/// in New York time.
pub fn chart_payload(symbol: &str, samples: &[(i64, f64)]) -> serde_json::Value {
    chart_payload_at(symbol, -18000, samples)
}

/// Same as [`chart_payload`] for an exchange `gmtoffset` seconds from UTC.
pub fn chart_payload_at(symbol: &str, gmtoffset: i64, samples: &[(i64, f64)]) -> serde_json::Value {
    let timestamps: Vec<i64> = samples.iter().map(|(ts, _)| *ts).collect();
    let closes: Vec<f64> = samples.iter().map(|(_, close)| *close).collect();
    serde_json::json!({
        "chart": {
            "result": [{
                "meta": {
                    "symbol": symbol,
                    "currency": "USD",
                    "exchangeName": "NMS",
                    "gmtoffset": gmtoffset
                },
                "timestamp": timestamps,
                "indicators": {
                    "quote": [{
                        "open": closes,
                        "high": closes,
                        "low": closes,
                        "close": closes,
                        "volume": vec![1_000; samples.len()]
                    }],
                    "adjclose": [{ "adjclose": closes }]
                }
            }],
            "error": null
        }
    })
}
