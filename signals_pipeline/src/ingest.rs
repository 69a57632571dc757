//! `load`: fetch daily prices for the universe and replace the day partitions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::{Error, Result};
use crate::fetch::{ChartClient, ChartQuery};
use crate::io::frame::price_frame;
use crate::models::PricePoint;
use crate::partition::{Partition, PartitionKey, ReplaceOptions, ReplaceReport, replace_partitions};
use crate::pool::reducers::tabular_merge;
use crate::pool::{ResultSet, TaskPool};
use crate::storage::ObjectStore;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub tickers: Vec<String>,
    /// First day fetched.
    pub start: NaiveDate,
    /// First day not fetched.
    pub end: NaiveDate,
}

impl IngestRequest {
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(Error::Validation(format!(
                "start {} must be before end {}",
                self.start, self.end
            )));
        }
        if self.tickers.is_empty() {
            return Err(Error::Validation("no tickers selected".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub requested: usize,
    pub failed_fetches: usize,
    pub rows: usize,
    /// Merged rows dropped for falling outside `[start, end)`.
    pub out_of_window: usize,
    pub days: usize,
    pub replace: Option<ReplaceReport>,
}

struct FetchParams {
    client: Arc<ChartClient>,
    query: ChartQuery,
}

/// One request per ticker, keyed by request URL.
pub async fn fetch_prices(
    client: Arc<ChartClient>,
    tickers: &[String],
    query: ChartQuery,
    max_concurrency: usize,
) -> ResultSet<String, Value> {
    let urls: Vec<String> = tickers.iter().map(|t| client.ticker_url(t)).collect();
    info!(tickers = urls.len(), max_concurrency, "Fetching prices");
    let params = Arc::new(FetchParams { client, query });

    TaskPool::new(max_concurrency)
        .execute(
            urls,
            |url, params: Arc<FetchParams>| async move { params.client.fetch(&url, &params.query).await },
            params,
        )
        .await
}

/// Groups rows by calendar day into `{root}/{y}/{m}/{d}` partitions.
pub fn day_partitions(rows: &[PricePoint], root: &str) -> Result<Vec<Partition>> {
    let mut by_day: BTreeMap<NaiveDate, Vec<PricePoint>> = BTreeMap::new();
    for row in rows {
        by_day.entry(row.date()).or_default().push(row.clone());
    }

    by_day
        .into_iter()
        .map(|(day, rows)| {
            Ok(Partition {
                key: PartitionKey::day(root, day),
                data: price_frame(&rows)?,
            })
        })
        .collect()
}

/// Keeps rows whose exchange-local date lies in `[start, end)`.
///
/// The request window is built on UTC midnights, so exchanges far from UTC
/// (and live bars past `period2`) can return rows dated outside it.
pub fn clip_to_window(rows: Vec<PricePoint>, start: NaiveDate, end: NaiveDate) -> (Vec<PricePoint>, usize) {
    let total = rows.len();
    let kept: Vec<PricePoint> = rows
        .into_iter()
        .filter(|r| (start..end).contains(&r.date()))
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Merges fetched payloads and replaces one partition per day of
/// `[start, end)` they cover. Days outside the window are never touched.
pub async fn publish_prices(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    results: ResultSet<String, Value>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<IngestReport> {
    let requested = results.len();
    let failed_fetches = results.failure_count();
    let (rows, out_of_window) = clip_to_window(tabular_merge(results), start, end);
    if out_of_window > 0 {
        warn!(out_of_window, %start, %end, "Dropped rows dated outside the load window");
    }
    info!(requested, failed_fetches, rows = rows.len(), "Prices merged");

    let mut report = IngestReport {
        requested,
        failed_fetches,
        rows: rows.len(),
        out_of_window,
        ..IngestReport::default()
    };
    if !config.ingest.empty_result.check("ingest", rows.is_empty())? {
        return Ok(report);
    }

    let partitions = day_partitions(&rows, &config.ingest.raw_prefix)?;
    report.days = partitions.len();
    report.replace = Some(
        replace_partitions(
            store,
            partitions,
            &ReplaceOptions::new(config.pool.max_concurrency, &config.storage.staging_dir),
        )
        .await?,
    );
    Ok(report)
}

pub async fn run_ingest(
    config: &PipelineConfig,
    client: Arc<ChartClient>,
    store: Arc<dyn ObjectStore>,
    request: IngestRequest,
) -> Result<IngestReport> {
    request.validate()?;
    let started = Instant::now();
    info!(
        tickers = request.tickers.len(),
        start = %request.start,
        end = %request.end,
        "Starting load"
    );

    let query = ChartQuery::for_window(request.start, request.end);
    let results = fetch_prices(client, &request.tickers, query, config.pool.max_concurrency).await;
    let report = publish_prices(config, store, results, request.start, request.end).await?;

    info!(
        rows = report.rows,
        days = report.days,
        uploaded = report.replace.map_or(0, |r| r.uploaded),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Load finished"
    );
    Ok(report)
}
