//! Folds a [`ResultSet`] into one value.
//!
//! Reducers never fail: failed tasks and payloads that cannot be used are
//! logged and skipped.

use std::fmt::Display;

use polars::prelude::DataFrame;
use serde_json::Value;
use tracing::{debug, warn};

use super::ResultSet;
use crate::models::chart::ChartResponse;
use crate::models::{PricePoint, dedupe_earliest};
use crate::storage::StoreResponse;

/// Decodes chart payloads into one deduplicated table sorted by (date, ticker).
pub fn tabular_merge<I: Display>(results: ResultSet<I, Value>) -> Vec<PricePoint> {
    results.log_failures("fetch");

    let mut samples = Vec::new();
    for outcome in results.into_results() {
        let Ok(payload) = outcome.result else {
            continue;
        };
        match ChartResponse::from_value(payload).and_then(ChartResponse::into_price_points) {
            Ok(points) => samples.extend(points),
            Err(err) => warn!(task = %outcome.task, error = %err, "Skipping undecodable payload"),
        }
    }

    let sampled = samples.len();
    let rows = dedupe_earliest(samples);
    debug!(sampled, rows = rows.len(), "Merged price samples");
    rows
}

/// Stacks successful frames vertically. Frames whose schema does not match the
/// first one are skipped before anything is appended.
pub fn raw_collect<I: Display>(results: ResultSet<I, DataFrame>) -> DataFrame {
    results.log_failures("transform");

    let mut combined: Option<DataFrame> = None;
    for outcome in results.into_results() {
        let Ok(frame) = outcome.result else {
            continue;
        };
        match combined.as_mut() {
            None => combined = Some(frame),
            Some(acc) => {
                // vstack_mut extends column by column, so a late mismatch would
                // leave the accumulator with uneven columns.
                if acc.schema() != frame.schema() {
                    warn!(task = %outcome.task, "Skipping frame with mismatched schema");
                    continue;
                }
                if let Err(err) = acc.vstack_mut(&frame) {
                    warn!(task = %outcome.task, error = %err, "Skipping frame that failed to stack");
                }
            }
        }
    }
    combined.unwrap_or_else(DataFrame::empty)
}

/// Number of tasks whose response carries `ok_status`.
pub fn pass_fail_count<I: Display>(results: &ResultSet<I, StoreResponse>, ok_status: u16) -> usize {
    results.log_failures("upload");
    let passed = results
        .successes()
        .filter(|(task, response)| {
            let passed = response.status_code == ok_status;
            if !passed {
                warn!(task = %task, status = response.status_code, "Unexpected store status");
            }
            passed
        })
        .count();
    debug!(passed, total = results.len(), "Counted store responses");
    passed
}

/// Successful payloads in ascending order.
pub fn ordered_collect<I: Display, T: Ord>(results: ResultSet<I, T>) -> Vec<T> {
    results.log_failures("collect");
    let mut values: Vec<T> = results
        .into_results()
        .into_iter()
        .filter_map(|outcome| outcome.result.ok())
        .collect();
    values.sort();
    values
}
