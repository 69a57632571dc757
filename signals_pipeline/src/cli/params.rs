use chrono::NaiveDate;

use crate::errors::{Error, Result};

/// Parses a `YYMMDD` date argument.
pub fn parse_yymmdd(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Validation(format!("{raw:?} is not a YYMMDD date")));
    }
    NaiveDate::parse_from_str(raw, "%y%m%d")
        .map_err(|e| Error::Validation(format!("{raw:?} is not a valid date: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadArgs {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub ticker: Option<String>,
    pub ntickers: Option<usize>,
}

/// Checks the `load` arguments: valid dates, `start < end` and `ntickers > 0`.
pub fn validate_load_args(
    start: &str,
    end: &str,
    ticker: Option<&str>,
    ntickers: Option<usize>,
) -> Result<LoadArgs> {
    let start = parse_yymmdd(start)?;
    let end = parse_yymmdd(end)?;
    if start >= end {
        return Err(Error::Validation(format!(
            "start {start} must be before end {end}"
        )));
    }
    if ntickers == Some(0) {
        return Err(Error::Validation("ntickers must be greater than zero".into()));
    }
    let ticker = ticker.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
    Ok(LoadArgs {
        start,
        end,
        ticker,
        ntickers,
    })
}
