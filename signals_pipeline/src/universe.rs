//! Ticker universe: Bloomberg identifiers mapped to price-API symbols.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Error, Result};

#[derive(Debug, Deserialize)]
struct TickerMapRow {
    bloomberg_ticker: String,
    #[serde(default)]
    yahoo: Option<String>,
}

/// Bloomberg ticker to price-API symbol, in file order.
#[derive(Debug, Clone, Default)]
pub struct TickerUniverse {
    symbols: IndexMap<String, Option<String>>,
}

impl TickerUniverse {
    /// Reads the `ticker,bloomberg_ticker,yahoo` map and applies the optional
    /// corrections file.
    pub fn load(map_path: &Path, corrections_path: Option<&Path>) -> Result<Self> {
        let mut universe = Self::from_reader(fs::File::open(map_path).map_err(|e| {
            Error::Config(format!("cannot open ticker map {}: {e}", map_path.display()))
        })?)?;

        if let Some(path) = corrections_path.filter(|p| p.exists()) {
            let corrections: IndexMap<String, String> = serde_json::from_str(&fs::read_to_string(path)?)?;
            debug!(corrections = corrections.len(), "Applying ticker corrections");
            universe.apply_corrections(corrections);
        }

        info!(tickers = universe.len(), "Ticker universe loaded");
        Ok(universe)
    }

    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut symbols = IndexMap::new();
        for row in csv.deserialize::<TickerMapRow>() {
            let row = row?;
            let yahoo = row.yahoo.filter(|s| !s.trim().is_empty());
            symbols.insert(row.bloomberg_ticker, yahoo);
        }
        Ok(Self { symbols })
    }

    /// Overrides the symbol of known Bloomberg tickers and appends unknown ones.
    pub fn apply_corrections(&mut self, corrections: IndexMap<String, String>) {
        for (bloomberg, yahoo) in corrections {
            self.symbols.insert(bloomberg, Some(yahoo));
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Mapped price-API symbols, in file order, skipping unmapped entries.
    pub fn yahoo_tickers(&self) -> Vec<String> {
        self.symbols.values().flatten().cloned().collect()
    }

    /// Applies the `--ntickers` cap, then the `--ticker` filter.
    pub fn select(&self, ticker: Option<&str>, ntickers: Option<usize>) -> Result<Vec<String>> {
        let mut tickers = self.yahoo_tickers();
        if let Some(n) = ntickers {
            tickers.truncate(n);
        }
        if let Some(wanted) = ticker {
            if !tickers.iter().any(|t| t == wanted) {
                return Err(Error::Validation(format!(
                    "ticker {wanted} is not in the selected universe"
                )));
            }
            tickers = vec![wanted.to_string()];
        }
        Ok(tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "ticker,bloomberg_ticker,yahoo\n\
                       AAPL,AAPL US,AAPL\n\
                       MSFT,MSFT US,MSFT\n\
                       XXX,XXX US,\n\
                       SAP,SAP GR,SAP.DE\n";

    #[test]
    fn unmapped_rows_are_skipped() {
        let universe = TickerUniverse::from_reader(MAP.as_bytes()).unwrap();
        assert_eq!(universe.len(), 4);
        assert_eq!(universe.yahoo_tickers(), ["AAPL", "MSFT", "SAP.DE"]);
    }

    #[test]
    fn corrections_update_and_append() {
        let mut universe = TickerUniverse::from_reader(MAP.as_bytes()).unwrap();
        universe.apply_corrections(IndexMap::from([
            ("XXX US".to_string(), "XXX".to_string()),
            ("NEW LN".to_string(), "NEW.L".to_string()),
        ]));
        assert_eq!(universe.yahoo_tickers(), ["AAPL", "MSFT", "XXX", "SAP.DE", "NEW.L"]);
    }

    #[test]
    fn cap_then_filter() {
        let universe = TickerUniverse::from_reader(MAP.as_bytes()).unwrap();
        assert_eq!(universe.select(None, Some(2)).unwrap(), ["AAPL", "MSFT"]);
        assert_eq!(universe.select(Some("MSFT"), None).unwrap(), ["MSFT"]);
        assert!(matches!(
            universe.select(Some("SAP.DE"), Some(2)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn loads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("ticker_map.csv");
        let corrections = dir.path().join("corrections.json");
        std::fs::write(&map, MAP).unwrap();
        std::fs::write(&corrections, r#"{"MSFT US": "MSFT.MX"}"#).unwrap();

        let universe = TickerUniverse::load(&map, Some(&corrections)).unwrap();
        assert_eq!(universe.yahoo_tickers(), ["AAPL", "MSFT.MX", "SAP.DE"]);

        let missing = TickerUniverse::load(&dir.path().join("nope.csv"), None);
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
