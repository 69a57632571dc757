//! Conversions between price records, polars frames and local files.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::PricePoint;

pub const TICKER: &str = "ticker";
pub const TIMESTAMP: &str = "timestamp";

fn days_since_epoch(date: NaiveDate) -> i32 {
    // NaiveDate::default() is 1970-01-01.
    date.signed_duration_since(NaiveDate::default()).num_days() as i32
}

/// Builds the canonical price frame. `timestamp` is stored as a date column.
pub fn price_frame(rows: &[PricePoint]) -> PolarsResult<DataFrame> {
    let float = |name: &str, get: fn(&PricePoint) -> Option<f64>| {
        Column::new(name.into(), rows.iter().map(get).collect::<Vec<_>>())
    };
    let timestamps = Column::new(
        TIMESTAMP.into(),
        rows.iter()
            .map(|r| days_since_epoch(r.date()))
            .collect::<Vec<i32>>(),
    )
    .cast(&DataType::Date)?;

    DataFrame::new(vec![
        Column::new(
            TICKER.into(),
            rows.iter().map(|r| r.ticker.as_str()).collect::<Vec<_>>(),
        ),
        timestamps,
        float("open", |r| r.open),
        float("high", |r| r.high),
        float("low", |r| r.low),
        float("close", |r| r.close),
        float("adjusted_close", |r| r.adjusted_close),
        float("volume", |r| r.volume),
        Column::new(
            "currency".into(),
            rows.iter().map(|r| r.currency.as_str()).collect::<Vec<_>>(),
        ),
        Column::new(
            "exchange".into(),
            rows.iter().map(|r| r.exchange.as_str()).collect::<Vec<_>>(),
        ),
    ])
}

/// Serialises `df` as parquet into `staging_dir` under a unique name and
/// returns the path. The caller owns the file and removes it after upload.
pub fn write_parquet_to_staging(df: &mut DataFrame, staging_dir: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(staging_dir)?;
    let path = staging_dir.join(format!("{stem}_{}.parquet", Uuid::new_v4()));
    let file = File::create(&path)?;
    if let Err(err) = ParquetWriter::new(file).finish(df) {
        let _ = fs::remove_file(&path);
        return Err(err.into());
    }
    Ok(path)
}

pub fn read_parquet_bytes(bytes: Vec<u8>) -> PolarsResult<DataFrame> {
    ParquetReader::new(Cursor::new(bytes)).finish()
}

/// Splits `df` into one frame per distinct value of a string column, sorted by
/// that value. Rows with a null key are dropped.
pub fn split_by_string_column(df: &DataFrame, column: &str) -> PolarsResult<Vec<(String, DataFrame)>> {
    let values = df.column(column)?.str()?;
    let mut groups: BTreeMap<String, Vec<IdxSize>> = BTreeMap::new();
    for (idx, value) in values.into_iter().enumerate() {
        if let Some(value) = value {
            groups.entry(value.to_string()).or_default().push(idx as IdxSize);
        }
    }

    groups
        .into_iter()
        .map(|(key, indices)| {
            let indices = IdxCa::from_vec("idx".into(), indices);
            Ok((key, df.take(&indices)?))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawRow {
    ticker: String,
    timestamp: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    adjusted_close: Option<f64>,
    volume: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

/// Reads the raw price table exported by the query service.
pub fn read_price_csv(path: &Path) -> Result<Vec<PricePoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<RawRow>().enumerate() {
        let raw = record?;
        let timestamp = parse_timestamp(&raw.timestamp).ok_or_else(|| {
            Error::Validation(format!(
                "{}: row {} has an unreadable timestamp {:?}",
                path.display(),
                line + 1,
                raw.timestamp
            ))
        })?;
        rows.push(PricePoint {
            ticker: raw.ticker,
            timestamp,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            adjusted_close: raw.adjusted_close,
            volume: raw.volume,
            currency: raw.currency.unwrap_or_default(),
            exchange: raw.exchange.unwrap_or_default(),
        });
    }
    Ok(rows)
}
