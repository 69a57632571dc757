//! Per-ticker feature engineering and publication of the feature partitions.

pub mod indicators;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use polars::prelude::*;
use serde::Deserialize;
use tracing::info;

use self::indicators::{Bars, IndicatorFn};
use crate::config::PipelineConfig;
use crate::errors::{Error, Result, TaskError};
use crate::io::frame::{TICKER, price_frame, read_price_csv, split_by_string_column};
use crate::models::PricePoint;
use crate::partition::{Partition, PartitionKey, ReplaceOptions, ReplaceReport, replace_partitions};
use crate::pool::TaskPool;
use crate::pool::reducers::raw_collect;
use crate::storage::ObjectStore;

/// Group of indicators computed by one `transform` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum IndicatorFamily {
    All,
    Momentum,
    Other,
    Trend,
    Volatility,
    Volume,
}

/// Dispatch table, in declaration order of [`IndicatorFamily`].
const FAMILY_TABLE: [(IndicatorFamily, IndicatorFn); 6] = [
    (IndicatorFamily::All, indicators::all),
    (IndicatorFamily::Momentum, indicators::momentum),
    (IndicatorFamily::Other, indicators::other),
    (IndicatorFamily::Trend, indicators::trend),
    (IndicatorFamily::Volatility, indicators::volatility),
    (IndicatorFamily::Volume, indicators::volume),
];

impl IndicatorFamily {
    pub const ALL: [IndicatorFamily; 6] = [
        Self::All,
        Self::Momentum,
        Self::Other,
        Self::Trend,
        Self::Volatility,
        Self::Volume,
    ];

    pub fn compute_fn(self) -> IndicatorFn {
        FAMILY_TABLE[self as usize].1
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Momentum => "momentum",
            Self::Other => "other",
            Self::Trend => "trend",
            Self::Volatility => "volatility",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for IndicatorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndicatorFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Validation(format!("unknown indicator family {s:?}")))
    }
}

pub fn feature_column_name(indicator: &str, shift: usize) -> String {
    format!("FEATURE_{indicator}_shift{shift}")
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// `shift k` holds the value `k` rows earlier, or null before the series starts.
pub fn lagged(values: &[f64], shift: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| t.checked_sub(shift).map(|src| round4(values[src])))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureOptions {
    pub lags: usize,
    pub weekday: Option<Weekday>,
}

/// Builds the feature frame for one ticker: price columns followed by
/// `FEATURE_{indicator}_shift{k}` for every indicator and `k < lags`.
pub fn transform_ticker(
    ticker: &str,
    rows: &[PricePoint],
    family: IndicatorFamily,
    options: FeatureOptions,
) -> std::result::Result<DataFrame, TaskError> {
    let compute = |message: String| TaskError::Compute {
        target: ticker.to_string(),
        message,
    };

    let mut rows = rows.to_vec();
    rows.sort_by_key(|r| r.timestamp);

    let bars = Bars::from_points(&rows).map_err(|e| compute(format!("{e:?}")))?;
    let series = (family.compute_fn())(&bars).map_err(|e| compute(format!("{e:?}")))?;

    let mut frame = price_frame(&rows).map_err(|e| compute(e.to_string()))?;
    for indicator in &series {
        for shift in 0..options.lags {
            let column = Column::new(
                feature_column_name(indicator.name, shift).into(),
                lagged(&indicator.values, shift),
            );
            frame.with_column(column).map_err(|e| compute(e.to_string()))?;
        }
    }

    if let Some(weekday) = options.weekday {
        let keep: Vec<bool> = rows.iter().map(|r| r.date().weekday() == weekday).collect();
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        frame = frame.filter(&mask).map_err(|e| compute(e.to_string()))?;
    }
    Ok(frame)
}

/// Keeps rows dated within `lookback_days` before `today`, inclusive.
pub fn within_lookback(rows: Vec<PricePoint>, today: NaiveDate, lookback_days: u64) -> Vec<PricePoint> {
    let earliest = today.checked_sub_days(Days::new(lookback_days)).unwrap_or(NaiveDate::MIN);
    rows.into_iter()
        .filter(|r| (earliest..=today).contains(&r.date()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub family: IndicatorFamily,
    /// Overrides `transform.lags`.
    pub lags: Option<usize>,
    pub today: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct TransformReport {
    pub tickers: usize,
    pub failed_tickers: usize,
    pub rows: usize,
    pub replace: Option<ReplaceReport>,
}

struct TransformParams {
    rows_by_ticker: HashMap<String, Vec<PricePoint>>,
    family: IndicatorFamily,
    options: FeatureOptions,
}

/// Computes features for every ticker of `rows` and returns the stacked table.
pub async fn compute_features(
    rows: Vec<PricePoint>,
    family: IndicatorFamily,
    options: FeatureOptions,
    max_concurrency: usize,
) -> (DataFrame, usize, usize) {
    let mut rows_by_ticker: HashMap<String, Vec<PricePoint>> = HashMap::new();
    for row in rows {
        rows_by_ticker.entry(row.ticker.clone()).or_default().push(row);
    }
    let mut tickers: Vec<String> = rows_by_ticker.keys().cloned().collect();
    tickers.sort();
    let ticker_count = tickers.len();

    let params = Arc::new(TransformParams {
        rows_by_ticker,
        family,
        options,
    });
    let results = TaskPool::new(max_concurrency)
        .execute(
            tickers,
            |ticker, params: Arc<TransformParams>| async move {
                let task_ticker = ticker.clone();
                tokio::task::spawn_blocking(move || {
                    let rows = params
                        .rows_by_ticker
                        .get(&task_ticker)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    transform_ticker(&task_ticker, rows, params.family, params.options)
                })
                .await
                .map_err(|e| TaskError::Compute {
                    target: ticker,
                    message: e.to_string(),
                })?
            },
            params,
        )
        .await;

    let failed = results.failure_count();
    (raw_collect(results), ticker_count, failed)
}

/// Splits the feature table into one partition per ticker below
/// `{output_prefix}/{family}`.
pub fn ticker_partitions(frame: &DataFrame, root: &str) -> Result<Vec<Partition>> {
    Ok(split_by_string_column(frame, TICKER)?
        .into_iter()
        .map(|(ticker, data)| Partition {
            key: PartitionKey::ticker(root, &ticker),
            data,
        })
        .collect())
}

/// Loads the raw table, computes features and replaces the feature partitions.
pub async fn run_transform(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    request: TransformRequest,
) -> Result<TransformReport> {
    let started = Instant::now();
    let settings = &config.transform;
    let options = FeatureOptions {
        lags: request.lags.unwrap_or(settings.lags),
        weekday: settings.weekday,
    };
    if options.lags == 0 {
        return Err(Error::Validation("lags must be greater than zero".into()));
    }

    info!(path = %settings.raw_table.display(), "Loading raw table");
    let raw_table = settings.raw_table.clone();
    let rows = tokio::task::spawn_blocking(move || read_price_csv(&raw_table))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    let loaded = rows.len();
    let rows = within_lookback(rows, request.today, settings.lookback_days);
    info!(loaded, kept = rows.len(), lookback_days = settings.lookback_days, "Raw table filtered");

    let (frame, tickers, failed_tickers) =
        compute_features(rows, request.family, options, config.pool.max_concurrency).await;
    info!(tickers, failed_tickers, family = %request.family, lags = options.lags, "Features computed");

    if !settings.empty_result.check("transform", frame.height() == 0)? {
        return Ok(TransformReport {
            tickers,
            failed_tickers,
            rows: 0,
            replace: None,
        });
    }

    let root = format!("{}/{}", settings.output_prefix.trim_end_matches('/'), request.family);
    let partitions = ticker_partitions(&frame, &root)?;
    let replace = replace_partitions(
        store,
        partitions,
        &ReplaceOptions::new(config.pool.max_concurrency, &config.storage.staging_dir),
    )
    .await?;

    info!(
        rows = frame.height(),
        uploaded = replace.uploaded,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Rows published"
    );
    Ok(TransformReport {
        tickers,
        failed_tickers,
        rows: frame.height(),
        replace: Some(replace),
    })
}
