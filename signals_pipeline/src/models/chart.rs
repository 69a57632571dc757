//! Wire model of the v8 chart endpoint and its conversion to [`PricePoint`]s.

use chrono::DateTime;
use serde::Deserialize;
use thiserror::Error;

use super::price_point::PricePoint;

#[derive(Debug, Error)]
pub enum ChartDecodeError {
    #[error("Malformed chart payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The API answered with an error object instead of a result.
    #[error("Chart API error {code}: {description}")]
    Api { code: String, description: String },

    #[error("Chart payload has no result")]
    Empty,

    #[error("Timestamp {0} is out of range")]
    Timestamp(i64),
}

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
pub struct ChartEnvelope {
    pub result: Option<Vec<ChartData>>,
    pub error: Option<ChartApiError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartApiError {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ChartData {
    pub meta: ChartMeta,
    pub timestamp: Option<Vec<i64>>,
    pub indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    pub symbol: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub exchange_name: Option<String>,
    /// Seconds east of UTC for the listing exchange.
    #[serde(default)]
    pub gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    pub quote: Vec<QuoteData>,
    #[serde(default)]
    pub adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuoteData {
    pub open: Vec<Option<f64>>,
    pub high: Vec<Option<f64>>,
    pub low: Vec<Option<f64>>,
    pub close: Vec<Option<f64>>,
    pub volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct AdjCloseData {
    #[serde(default)]
    pub adjclose: Vec<Option<f64>>,
}

impl ChartResponse {
    pub fn from_value(value: serde_json::Value) -> Result<Self, ChartDecodeError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Flattens every result block into exchange-local samples.
    ///
    /// Samples whose OHLCV fields are all missing are skipped; intraday duplicates
    /// are kept and left to the merge step.
    pub fn into_price_points(self) -> Result<Vec<PricePoint>, ChartDecodeError> {
        let results = match (self.chart.result, self.chart.error) {
            (_, Some(err)) => {
                return Err(ChartDecodeError::Api {
                    code: err.code,
                    description: err.description,
                });
            }
            (Some(results), None) if !results.is_empty() => results,
            _ => return Err(ChartDecodeError::Empty),
        };

        let mut points = Vec::new();
        for data in results {
            let meta = &data.meta;
            let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
            let adjusted = data
                .indicators
                .adjclose
                .and_then(|blocks| blocks.into_iter().next())
                .map(|block| block.adjclose);

            for (i, &ts) in data.timestamp.as_deref().unwrap_or_default().iter().enumerate() {
                let local = ts
                    .checked_add(meta.gmtoffset)
                    .and_then(|local| DateTime::from_timestamp(local, 0))
                    .ok_or(ChartDecodeError::Timestamp(ts))?;
                let point = PricePoint {
                    ticker: meta.symbol.clone(),
                    timestamp: local.naive_utc(),
                    open: quote.open.get(i).copied().flatten(),
                    high: quote.high.get(i).copied().flatten(),
                    low: quote.low.get(i).copied().flatten(),
                    close: quote.close.get(i).copied().flatten(),
                    adjusted_close: adjusted.as_ref().and_then(|v| v.get(i).copied().flatten()),
                    volume: quote.volume.get(i).copied().flatten(),
                    currency: meta.currency.clone().unwrap_or_default(),
                    exchange: meta.exchange_name.clone().unwrap_or_default(),
                };
                if !point.is_blank() {
                    points.push(point);
                }
            }
        }
        Ok(points)
    }
}
