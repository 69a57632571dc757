//! Daily price ingestion and feature engineering over a partitioned object store.
//!
//! The crate is built around a bounded-concurrency [`pool::TaskPool`] whose
//! [`pool::ResultSet`]s are folded by the reducers in [`pool::reducers`], and
//! the delete-verify-write protocol in [`partition`] that publishes results.

pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod fetch;
pub mod ingest;
pub mod io;
pub mod logging;
pub mod models;
pub mod partition;
pub mod pool;
pub mod query;
pub mod storage;
pub mod transform;
pub mod universe;

pub use errors::{Error, Result, TaskError};
