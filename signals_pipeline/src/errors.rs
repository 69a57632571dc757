use thiserror::Error;

use crate::storage::StorageError;

/// Failure of a single pool task.
///
/// These are recovered locally: the task is recorded as failed in the
/// [`ResultSet`](crate::pool::ResultSet) and its siblings keep running.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Network or API failure (connection, timeout, non-success status).
    #[error("Transport error for {target}: {message}")]
    Transport { target: String, message: String },

    /// The payload arrived but could not be understood.
    #[error("Decode error for {target}: {message}")]
    Decode { target: String, message: String },

    /// An object-store call failed.
    #[error("Storage error for {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    /// Local file handling failed (staging, serialisation).
    #[error("I/O error for {target}: {message}")]
    Io { target: String, message: String },

    /// A computation inside the task failed.
    #[error("Computation failed for {target}: {message}")]
    Compute { target: String, message: String },

    /// A partition still held objects after its delete step.
    #[error("Partition {prefix} is not empty after delete ({} leftover object(s))", .leftover.len())]
    PartitionNotEmpty { prefix: String, leftover: Vec<String> },

    /// The task panicked; the panic was contained by the pool.
    #[error("Task {task} panicked: {message}")]
    Panicked { task: String, message: String },
}

/// The unified error type for a pipeline run.
#[derive(Debug, Error)]
pub enum Error {
    /// Post-delete verification found objects left under a partition prefix.
    #[error("Partition {prefix} still holds {} object(s) after delete: {leftover:?}", .leftover.len())]
    PartitionNotEmpty { prefix: String, leftover: Vec<String> },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A mandatory result was missing or inconsistent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A task failure that the current phase cannot tolerate.
    #[error("Task failed: {0}")]
    Task(#[from] TaskError),

    /// Object-store failure outside of a pool task.
    #[error("Storage error")]
    Storage(#[from] StorageError),

    /// The SQL query service reported a non-successful execution.
    #[error("Query {execution_id} finished as {state}")]
    Query { execution_id: String, state: String },

    /// The catalog crawler could not be run.
    #[error("Crawler {name}: {message}")]
    Crawler { name: String, message: String },

    #[error(transparent)]
    SharedConfig(#[from] shared_utils::config::ConfigError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Polars operation failed")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("CSV error")]
    Csv(#[from] csv::Error),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("TOML error")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP client error")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Lifts a task failure into a run-level error, keeping partition
    /// verification failures distinguishable.
    pub fn from_task(err: TaskError) -> Self {
        match err {
            TaskError::PartitionNotEmpty { prefix, leftover } => {
                Self::PartitionNotEmpty { prefix, leftover }
            }
            other => Self::Task(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
