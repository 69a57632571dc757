//! Delete-verify-write replacement of object-store partitions.
//!
//! A partition is every object below one key prefix (one calendar day of raw
//! prices, or one ticker of features). Replacing a batch of partitions runs two
//! pool phases: every prefix is emptied and verified first, and only when all of
//! them are clean are the new objects written.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::errors::{Error, Result, TaskError};
use crate::io::frame::write_parquet_to_staging;
use crate::pool::reducers::pass_fail_count;
use crate::pool::{TaskPool, TaskResult};
use crate::storage::{ObjectStore, STATUS_NO_CONTENT, STATUS_OK, StoreResponse};

/// Location of one partition: its prefix and the object written into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    prefix: String,
    object_name: String,
}

impl PartitionKey {
    /// `{root}/{year}/{month}/{day}` holding `yahoo_data_{yyMMddHHmmss}.parquet`.
    pub fn day(root: &str, day: NaiveDate) -> Self {
        Self {
            prefix: format!(
                "{}/{}/{}/{}",
                root.trim_end_matches('/'),
                day.year(),
                day.month(),
                day.day()
            ),
            object_name: format!("yahoo_data_{}000000.parquet", day.format("%y%m%d")),
        }
    }

    /// `{root}/{ticker}` holding `features_{ticker}.parquet`.
    pub fn ticker(root: &str, ticker: &str) -> Self {
        let safe = sanitize_segment(ticker);
        Self {
            prefix: format!("{}/{safe}", root.trim_end_matches('/')),
            object_name: format!("features_{safe}.parquet"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Listing prefix; the trailing slash keeps `.../3/1` from matching `.../3/10`.
    pub fn list_prefix(&self) -> String {
        format!("{}/", self.prefix)
    }

    pub fn object_key(&self) -> String {
        format!("{}/{}", self.prefix, self.object_name)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Rows destined for one partition.
#[derive(Debug, Clone)]
pub struct Partition {
    pub key: PartitionKey,
    pub data: DataFrame,
}

#[derive(Debug, Clone)]
pub struct ReplaceOptions {
    pub max_concurrency: usize,
    pub staging_dir: PathBuf,
    /// Treat an upload count below the partition count as a failed run.
    pub require_all_uploads: bool,
}

impl ReplaceOptions {
    pub fn new(max_concurrency: usize, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrency,
            staging_dir: staging_dir.into(),
            require_all_uploads: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceReport {
    pub partitions: usize,
    pub cleared_objects: usize,
    pub uploaded: usize,
    pub failed: usize,
}

fn storage_failure(key: &str, source: crate::storage::StorageError) -> TaskError {
    TaskError::Storage {
        key: key.to_string(),
        source,
    }
}

async fn delete_object(key: String, store: Arc<dyn ObjectStore>) -> TaskResult<StoreResponse> {
    let response = store
        .delete(&key)
        .await
        .map_err(|e| storage_failure(&key, e))?;
    if response.status_code != STATUS_NO_CONTENT {
        warn!(key, status = response.status_code, "Unexpected delete status");
    }
    Ok(response)
}

/// Empties one partition and verifies it is empty. Returns how many objects
/// were listed for deletion.
pub async fn clear_partition(
    store: Arc<dyn ObjectStore>,
    key: &PartitionKey,
    max_concurrency: usize,
) -> TaskResult<usize> {
    let prefix = key.list_prefix();
    let existing = store
        .list(&prefix)
        .await
        .map_err(|e| storage_failure(&prefix, e))?;

    if !existing.is_empty() {
        info!(partition = %key, objects = existing.len(), "Clearing partition");
        let deletes = TaskPool::new(max_concurrency)
            .execute(existing.clone(), delete_object, Arc::clone(&store))
            .await;
        deletes.log_failures("delete");
    }

    let leftover = store
        .list(&prefix)
        .await
        .map_err(|e| storage_failure(&prefix, e))?;
    if !leftover.is_empty() {
        return Err(TaskError::PartitionNotEmpty {
            prefix: key.prefix().to_string(),
            leftover,
        });
    }
    Ok(existing.len())
}

/// Stages `data` as parquet, uploads it to the partition's object key and
/// removes the staging file whatever the upload outcome.
pub async fn write_partition(
    store: &dyn ObjectStore,
    key: &PartitionKey,
    data: &DataFrame,
    staging_dir: PathBuf,
) -> TaskResult<StoreResponse> {
    let object_key = key.object_key();
    let io_failure = |message: String| TaskError::Io {
        target: object_key.clone(),
        message,
    };

    let mut frame = data.clone();
    let stem = key.object_name().trim_end_matches(".parquet").to_string();
    let local = tokio::task::spawn_blocking(move || {
        write_parquet_to_staging(&mut frame, &staging_dir, &stem)
    })
    .await
    .map_err(|e| io_failure(e.to_string()))?
    .map_err(|e| io_failure(e.to_string()))?;

    let uploaded = store.put(&object_key, &local).await;
    if let Err(err) = tokio::fs::remove_file(&local).await {
        warn!(path = %local.display(), error = %err, "Failed to remove staging file");
    }
    uploaded.map_err(|e| storage_failure(&object_key, e))
}

struct ClearParams {
    store: Arc<dyn ObjectStore>,
    max_concurrency: usize,
}

struct WriteParams {
    store: Arc<dyn ObjectStore>,
    frames: HashMap<PartitionKey, DataFrame>,
    staging_dir: PathBuf,
}

/// Replaces every partition in `partitions`.
///
/// All delete-and-verify tasks complete before any upload starts; a single
/// failure in that phase aborts the run without writing anything.
pub async fn replace_partitions(
    store: Arc<dyn ObjectStore>,
    partitions: Vec<Partition>,
    options: &ReplaceOptions,
) -> Result<ReplaceReport> {
    let keys: Vec<PartitionKey> = partitions.iter().map(|p| p.key.clone()).collect();
    let partition_count = keys.len();
    // Two inputs sanitized onto one key would race for the same object.
    let mut seen = HashSet::with_capacity(partition_count);
    if let Some(dup) = keys.iter().find(|key| !seen.insert(*key)) {
        return Err(Error::Validation(format!(
            "more than one partition maps to {}",
            dup.object_key()
        )));
    }

    let clear_params = Arc::new(ClearParams {
        store: Arc::clone(&store),
        max_concurrency: options.max_concurrency,
    });
    let cleared = TaskPool::new(options.max_concurrency)
        .execute(
            keys.clone(),
            |key, params: Arc<ClearParams>| async move {
                clear_partition(Arc::clone(&params.store), &key, params.max_concurrency).await
            },
            clear_params,
        )
        .await
        .into_all_ok("partition delete")
        .map_err(Error::from_task)?;
    let cleared_objects: usize = cleared.iter().map(|(_, n)| n).sum();
    info!(partitions = partition_count, cleared_objects, "Partitions cleared");

    let write_params = Arc::new(WriteParams {
        store,
        frames: partitions.into_iter().map(|p| (p.key, p.data)).collect(),
        staging_dir: options.staging_dir.clone(),
    });
    let uploads = TaskPool::new(options.max_concurrency)
        .execute(
            keys,
            |key, params: Arc<WriteParams>| async move {
                let data = params.frames.get(&key).ok_or_else(|| TaskError::Io {
                    target: key.to_string(),
                    message: "no rows staged for partition".into(),
                })?;
                write_partition(params.store.as_ref(), &key, data, params.staging_dir.clone()).await
            },
            write_params,
        )
        .await;

    let uploaded = pass_fail_count(&uploads, STATUS_OK);
    let report = ReplaceReport {
        partitions: partition_count,
        cleared_objects,
        uploaded,
        failed: partition_count - uploaded,
    };
    info!(
        partitions = report.partitions,
        uploaded = report.uploaded,
        failed = report.failed,
        "Partitions written"
    );

    if options.require_all_uploads && report.failed > 0 {
        return Err(Error::Validation(format!(
            "{} of {} partition uploads failed",
            report.failed, report.partitions
        )));
    }
    Ok(report)
}
