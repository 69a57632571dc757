use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use signals_pipeline::config::{EmptyResultPolicy, PipelineConfig};
use signals_pipeline::errors::Error;
use signals_pipeline::io::frame::read_parquet_bytes;
use signals_pipeline::storage::{LocalObjectStore, ObjectStore};
use signals_pipeline::transform::{IndicatorFamily, TransformRequest, run_transform};

const HEADER: &str = "ticker,timestamp,open,high,low,close,adjusted_close,volume,currency,exchange\n";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn push_days(csv: &mut String, ticker: &str, start: NaiveDate, days: u64, base: f64) {
    for i in 0..days {
        let close = base + (i as f64 * 0.7).sin() * 3.0;
        writeln!(
            csv,
            "{ticker},{} 00:00:00,{:.2},{:.2},{:.2},{close:.2},{close:.2},{},USD,NMS",
            start + Days::new(i),
            close - 0.4,
            close + 1.1,
            close - 1.2,
            10_000 + i * 37,
        )
        .unwrap();
    }
}

fn config_for(dir: &Path, csv: &str) -> PipelineConfig {
    let raw_table = dir.join("data.csv");
    std::fs::write(&raw_table, csv).unwrap();
    let staging = dir.join("staging");
    std::fs::create_dir_all(&staging).unwrap();

    let mut config = PipelineConfig::default();
    config.transform.raw_table = raw_table;
    config.storage.staging_dir = staging;
    config
}

fn volume_request(lags: usize) -> TransformRequest {
    TransformRequest {
        family: IndicatorFamily::Volume,
        lags: Some(lags),
        // Six weeks after Monday 2022-01-03.
        today: date(2022, 2, 13),
    }
}

#[tokio::test]
async fn raw_table_becomes_one_feature_object_per_ticker() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();

    let mut csv = HEADER.to_string();
    // Far outside the 540 day lookback.
    push_days(&mut csv, "AAPL", date(2020, 1, 3), 1, 75.0);
    push_days(&mut csv, "AAPL", date(2022, 1, 3), 42, 170.0);
    push_days(&mut csv, "MSFT", date(2022, 1, 3), 42, 310.0);
    let config = config_for(dir.path(), &csv);
    let store = Arc::new(LocalObjectStore::new(bucket.path()));

    let report = run_transform(&config, store.clone(), volume_request(2)).await.unwrap();
    assert_eq!((report.tickers, report.failed_tickers), (2, 0));
    assert_eq!(report.rows, 12);
    assert_eq!(report.replace.as_ref().unwrap().uploaded, 2);

    assert_eq!(
        store.list("transform_data/volume/").await.unwrap(),
        [
            "transform_data/volume/AAPL/features_AAPL.parquet",
            "transform_data/volume/MSFT/features_MSFT.parquet",
        ]
    );

    let aapl = read_parquet_bytes(
        store
            .get("transform_data/volume/AAPL/features_AAPL.parquet")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(aapl.height(), 6);
    let tickers: Vec<Option<&str>> = aapl.column("ticker").unwrap().str().unwrap().into_iter().collect();
    assert!(tickers.iter().all(|t| *t == Some("AAPL")));
    for column in ["FEATURE_volume_obv_shift0", "FEATURE_volume_obv_shift1", "FEATURE_volume_mfi_shift1"] {
        assert!(aapl.column(column).is_ok(), "missing {column}");
    }
    assert!(aapl.column("FEATURE_volume_obv_shift2").is_err());
    assert_eq!(std::fs::read_dir(&config.storage.staging_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn nothing_in_the_lookback_publishes_nothing_under_warn() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();

    let mut csv = HEADER.to_string();
    push_days(&mut csv, "AAPL", date(2020, 1, 3), 30, 75.0);
    let config = config_for(dir.path(), &csv);
    assert_eq!(config.transform.empty_result, EmptyResultPolicy::Warn);
    let store = Arc::new(LocalObjectStore::new(bucket.path()));

    let report = run_transform(&config, store.clone(), volume_request(2)).await.unwrap();
    assert_eq!((report.tickers, report.rows), (0, 0));
    assert!(report.replace.is_none());
    assert!(store.list("").await.unwrap().is_empty());
}

#[tokio::test]
async fn nothing_in_the_lookback_fails_under_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();

    let mut csv = HEADER.to_string();
    push_days(&mut csv, "AAPL", date(2020, 1, 3), 30, 75.0);
    let mut config = config_for(dir.path(), &csv);
    config.transform.empty_result = EmptyResultPolicy::Fatal;
    let store = Arc::new(LocalObjectStore::new(bucket.path()));

    let err = run_transform(&config, store.clone(), volume_request(2)).await.unwrap_err();
    assert!(matches!(&err, Error::Validation(msg) if msg.contains("transform produced no rows")), "{err}");
    assert!(store.list("").await.unwrap().is_empty());
}
