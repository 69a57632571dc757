//! Indicator families computed with the `ta` crate.
//!
//! Inputs are forward-filled before computation so every indicator yields one
//! value per bar.

use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, FastStochastic, MoneyFlowIndex,
    MovingAverageConvergenceDivergence, OnBalanceVolume, RateOfChange, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::{DataItem, Next};

use crate::models::PricePoint;

pub type IndicatorResult = Result<Vec<IndicatorSeries>, ta::errors::TaError>;

/// Signature shared by every family in the dispatch table.
pub type IndicatorFn = fn(&Bars) -> IndicatorResult;

/// One indicator value per bar.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub name: &'static str,
    pub values: Vec<f64>,
}

impl IndicatorSeries {
    /// Undefined values (warm-up divisions by zero) are stored as zero.
    fn new(name: &'static str, values: Vec<f64>) -> Self {
        let values = values
            .into_iter()
            .map(|v| if v.is_finite() { v } else { 0.0 })
            .collect();
        Self { name, values }
    }
}

/// Gap-free bars for one ticker in timestamp order.
#[derive(Debug, Clone)]
pub struct Bars {
    items: Vec<DataItem>,
    close: Vec<f64>,
    adjusted_close: Vec<f64>,
}

/// Carries the last seen value forward; leading gaps take the first value.
fn forward_fill(values: impl Iterator<Item = Option<f64>>, fallback: f64) -> Vec<f64> {
    let raw: Vec<Option<f64>> = values.collect();
    let first = raw.iter().flatten().copied().next().unwrap_or(fallback);
    let mut last = first;
    raw.into_iter()
        .map(|v| {
            if let Some(v) = v.filter(|v| v.is_finite()) {
                last = v;
            }
            last
        })
        .collect()
}

impl Bars {
    pub fn from_points(points: &[PricePoint]) -> Result<Self, ta::errors::TaError> {
        let close = forward_fill(points.iter().map(|p| p.close), 0.0);
        let fill = |get: fn(&PricePoint) -> Option<f64>| {
            let filled: Vec<Option<f64>> = points
                .iter()
                .zip(&close)
                .map(|(p, c)| get(p).or(Some(*c)))
                .collect();
            forward_fill(filled.into_iter(), 0.0)
        };
        let open = fill(|p| p.open);
        let high = fill(|p| p.high);
        let low = fill(|p| p.low);
        let adjusted_close = fill(|p| p.adjusted_close);
        let volume: Vec<f64> = points
            .iter()
            .map(|p| p.volume.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0))
            .collect();

        let mut items = Vec::with_capacity(points.len());
        for i in 0..points.len() {
            let (o, h, l, c) = (open[i], high[i], low[i], close[i]);
            // Bars with inconsistent extremes are widened to cover open and close.
            let item = DataItem::builder()
                .open(o)
                .high(h.max(o).max(c).max(l))
                .low(l.min(o).min(c).min(h))
                .close(c)
                .volume(volume[i])
                .build()?;
            items.push(item);
        }

        Ok(Self {
            items,
            close,
            adjusted_close,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn over_close<N: Next<f64, Output = f64>>(indicator: &mut N, bars: &Bars) -> Vec<f64> {
    bars.close.iter().map(|c| indicator.next(*c)).collect()
}

fn over_items<N>(indicator: &mut N, bars: &Bars) -> Vec<f64>
where
    N: for<'a> Next<&'a DataItem, Output = f64>,
{
    bars.items.iter().map(|item| indicator.next(item)).collect()
}

pub fn momentum(bars: &Bars) -> IndicatorResult {
    Ok(vec![
        IndicatorSeries::new("momentum_rsi", over_close(&mut RelativeStrengthIndex::new(14)?, bars)),
        IndicatorSeries::new("momentum_roc", over_close(&mut RateOfChange::new(12)?, bars)),
        IndicatorSeries::new("momentum_stoch", over_items(&mut FastStochastic::new(14)?, bars)),
    ])
}

pub fn trend(bars: &Bars) -> IndicatorResult {
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9)?;
    let (mut line, mut signal, mut diff) = (Vec::new(), Vec::new(), Vec::new());
    for close in &bars.close {
        let out = macd.next(*close);
        line.push(out.macd);
        signal.push(out.signal);
        diff.push(out.histogram);
    }

    Ok(vec![
        IndicatorSeries::new("trend_sma_fast", over_close(&mut SimpleMovingAverage::new(12)?, bars)),
        IndicatorSeries::new("trend_sma_slow", over_close(&mut SimpleMovingAverage::new(26)?, bars)),
        IndicatorSeries::new("trend_ema_fast", over_close(&mut ExponentialMovingAverage::new(12)?, bars)),
        IndicatorSeries::new("trend_ema_slow", over_close(&mut ExponentialMovingAverage::new(26)?, bars)),
        IndicatorSeries::new("trend_macd", line),
        IndicatorSeries::new("trend_macd_signal", signal),
        IndicatorSeries::new("trend_macd_diff", diff),
    ])
}

pub fn volatility(bars: &Bars) -> IndicatorResult {
    let mut bands = BollingerBands::new(20, 2.0)?;
    let (mut middle, mut upper, mut lower) = (Vec::new(), Vec::new(), Vec::new());
    for close in &bars.close {
        let out = bands.next(*close);
        middle.push(out.average);
        upper.push(out.upper);
        lower.push(out.lower);
    }

    Ok(vec![
        IndicatorSeries::new("volatility_atr", over_items(&mut AverageTrueRange::new(14)?, bars)),
        IndicatorSeries::new("volatility_bbm", middle),
        IndicatorSeries::new("volatility_bbh", upper),
        IndicatorSeries::new("volatility_bbl", lower),
    ])
}

pub fn volume(bars: &Bars) -> IndicatorResult {
    Ok(vec![
        IndicatorSeries::new("volume_obv", over_items(&mut OnBalanceVolume::new(), bars)),
        IndicatorSeries::new("volume_mfi", over_items(&mut MoneyFlowIndex::new(14)?, bars)),
    ])
}

/// Daily, log and cumulative returns (in percent) of the adjusted close.
pub fn other(bars: &Bars) -> IndicatorResult {
    let prices = &bars.adjusted_close;
    let ratio = |i: usize, base: f64| {
        if i == 0 || base == 0.0 { 1.0 } else { prices[i] / base }
    };

    let daily: Vec<f64> = (0..prices.len())
        .map(|i| (ratio(i, prices[i.saturating_sub(1)]) - 1.0) * 100.0)
        .collect();
    let daily_log: Vec<f64> = (0..prices.len())
        .map(|i| {
            let r = ratio(i, prices[i.saturating_sub(1)]);
            if r > 0.0 { r.ln() * 100.0 } else { 0.0 }
        })
        .collect();
    let first = prices.first().copied().unwrap_or(0.0);
    let cumulative: Vec<f64> = (0..prices.len())
        .map(|i| (ratio(i, first) - 1.0) * 100.0)
        .collect();

    Ok(vec![
        IndicatorSeries::new("others_dr", daily),
        IndicatorSeries::new("others_dlr", daily_log),
        IndicatorSeries::new("others_cr", cumulative),
    ])
}

pub fn all(bars: &Bars) -> IndicatorResult {
    let families: [IndicatorFn; 5] = [momentum, other, trend, volatility, volume];
    let mut series = Vec::new();
    for family in families {
        series.extend(family(bars)?);
    }
    Ok(series)
}
