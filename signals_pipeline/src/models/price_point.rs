//! Canonical daily price record shared by ingestion and transform.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One daily OHLCV observation for a ticker.
///
/// `timestamp` is expressed in exchange-local time. Upstream samples can carry an
/// intraday time; after [`dedupe_earliest`] the value is truncated to midnight of
/// the trading date, so at most one record exists per (ticker, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ticker: String,
    pub timestamp: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adjusted_close: Option<f64>,
    pub volume: Option<f64>,
    pub currency: String,
    pub exchange: String,
}

impl PricePoint {
    /// Calendar date of the sample.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// True when no price or volume field carries a value.
    pub fn is_blank(&self) -> bool {
        self.open.is_none()
            && self.high.is_none()
            && self.low.is_none()
            && self.close.is_none()
            && self.volume.is_none()
    }
}

/// Reduces samples to one per (ticker, date), keeping the one with the earliest
/// timestamp. The result is sorted by (date, ticker) and timestamps are truncated
/// to the date.
pub fn dedupe_earliest(samples: impl IntoIterator<Item = PricePoint>) -> Vec<PricePoint> {
    let mut earliest: BTreeMap<(NaiveDate, String), PricePoint> = BTreeMap::new();
    for sample in samples {
        let key = (sample.date(), sample.ticker.clone());
        match earliest.get(&key) {
            Some(kept) if kept.timestamp <= sample.timestamp => {}
            _ => {
                earliest.insert(key, sample);
            }
        }
    }

    earliest
        .into_values()
        .map(|mut point| {
            point.timestamp = point.date().and_time(chrono::NaiveTime::MIN);
            point
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(ticker: &str, ts: &str, open: f64) -> PricePoint {
        PricePoint {
            ticker: ticker.to_string(),
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            open: Some(open),
            high: Some(open),
            low: Some(open),
            close: Some(open),
            adjusted_close: Some(open),
            volume: Some(1.0),
            currency: "USD".into(),
            exchange: "NMS".into(),
        }
    }

    #[test]
    fn keeps_the_morning_sample() {
        let rows = dedupe_earliest(vec![
            sample("AAPL", "2022-03-01 15:59", 2.0),
            sample("AAPL", "2022-03-01 09:30", 1.0),
        ]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date(), NaiveDate::from_ymd_opt(2022, 3, 1).unwrap());
        assert_eq!(rows[0].open, Some(1.0));
        assert_eq!(rows[0].timestamp.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn sorts_by_date_then_ticker() {
        let rows = dedupe_earliest(vec![
            sample("MSFT", "2022-03-02 09:30", 1.0),
            sample("AAPL", "2022-03-02 09:30", 1.0),
            sample("MSFT", "2022-03-01 09:30", 1.0),
        ]);
        let order: Vec<_> = rows
            .iter()
            .map(|r| format!("{} {}", r.date(), r.ticker))
            .collect();
        assert_eq!(
            order,
            ["2022-03-01 MSFT", "2022-03-02 AAPL", "2022-03-02 MSFT"]
        );
    }

    proptest! {
        #[test]
        fn one_row_per_ticker_day_and_it_is_the_earliest(
            minutes in proptest::collection::vec((0usize..3, 0u32..3, 0u32..1440), 1..60)
        ) {
            let tickers = ["AAPL", "MSFT", "IBM"];
            let base = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
            let samples: Vec<PricePoint> = minutes
                .iter()
                .map(|&(t, day, minute)| {
                    let date = base + chrono::Days::new(u64::from(day));
                    let ts = date.and_hms_opt(minute / 60, minute % 60, 0).unwrap();
                    let mut p = sample(tickers[t], "2022-03-01 00:00", f64::from(minute));
                    p.timestamp = ts;
                    p
                })
                .collect();

            let rows = dedupe_earliest(samples.clone());

            let mut keys: Vec<_> = rows.iter().map(|r| (r.date(), r.ticker.clone())).collect();
            let before = keys.len();
            keys.dedup();
            prop_assert_eq!(before, keys.len());

            for row in &rows {
                let min_open = samples
                    .iter()
                    .filter(|s| s.ticker == row.ticker && s.date() == row.date())
                    .map(|s| s.open.unwrap())
                    .fold(f64::INFINITY, f64::min);
                prop_assert_eq!(row.open, Some(min_open));
            }
        }
    }
}
