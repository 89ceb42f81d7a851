//! Bar normalisation for the allocation engine.
//!
//! Converts raw provider bars into per-symbol [`OhlcBar`] series with
//! validated OHLC relationships, strictly increasing `end_ts`, and no
//! partial bars.
//!
//! It does **not** fetch data or compute statistics.

use std::collections::BTreeMap;
use std::fmt;

use pfa_schemas::OhlcBar;

use crate::ProviderBar;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Reasons a single bar is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizerError {
    /// A price string was empty.
    EmptyPrice { field: &'static str },
    /// A price string could not be parsed, or parsed to a non-finite value.
    InvalidPrice { field: &'static str, raw: String },
    /// A price is zero or negative.
    NonPositivePrice { field: &'static str, value: f64 },
    /// OHLC sanity check failed.
    OhlcViolation(String),
    /// Volume is negative.
    NegativeVolume(i64),
}

impl fmt::Display for NormalizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizerError::EmptyPrice { field } => {
                write!(f, "price field '{field}' is empty")
            }
            NormalizerError::InvalidPrice { field, raw } => {
                write!(f, "price field '{field}' could not be parsed: '{raw}'")
            }
            NormalizerError::NonPositivePrice { field, value } => {
                write!(f, "price field '{field}' must be > 0, got {value}")
            }
            NormalizerError::OhlcViolation(msg) => {
                write!(f, "OHLC sanity violation: {msg}")
            }
            NormalizerError::NegativeVolume(v) => {
                write!(f, "volume must be >= 0, got {v}")
            }
        }
    }
}

impl std::error::Error for NormalizerError {}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Per-symbol accounting of what normalisation kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub accepted: usize,
    /// Bars failing [`normalize_bar`].
    pub rejected: usize,
    /// Bars with `is_complete == false`.
    pub incomplete: usize,
    /// Bars sharing an `end_ts` with a later bar of the same symbol.
    pub duplicates: usize,
}

/// Normalised series keyed by symbol, plus the drop report.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSeries {
    pub series: BTreeMap<String, Vec<OhlcBar>>,
    pub report: BTreeMap<String, NormalizeStats>,
}

impl NormalizedSeries {
    /// Bars for `symbol`, or an empty slice when none survived.
    pub fn bars(&self, symbol: &str) -> &[OhlcBar] {
        self.series.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_dropped(&self) -> usize {
        self.report
            .values()
            .map(|s| s.rejected + s.incomplete + s.duplicates)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

fn parse_price(s: &str, field: &'static str) -> Result<f64, NormalizerError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormalizerError::EmptyPrice { field });
    }
    let v: f64 = s.parse().map_err(|_| NormalizerError::InvalidPrice {
        field,
        raw: s.to_string(),
    })?;
    if !v.is_finite() {
        return Err(NormalizerError::InvalidPrice {
            field,
            raw: s.to_string(),
        });
    }
    if v <= 0.0 {
        return Err(NormalizerError::NonPositivePrice { field, value: v });
    }
    Ok(v)
}

/// Normalise one [`ProviderBar`] into an [`OhlcBar`].
pub fn normalize_bar(bar: &ProviderBar) -> Result<OhlcBar, NormalizerError> {
    let open = parse_price(&bar.open, "open")?;
    let high = parse_price(&bar.high, "high")?;
    let low = parse_price(&bar.low, "low")?;
    let close = parse_price(&bar.close, "close")?;

    if bar.volume < 0 {
        return Err(NormalizerError::NegativeVolume(bar.volume));
    }

    validate_ohlc(open, high, low, close)?;

    Ok(OhlcBar::new(bar.end_ts, open, high, low, close, bar.volume as f64))
}

/// Normalise a batch into per-symbol series sorted by `end_ts`.
///
/// Invalid and partial bars are dropped and counted. When two bars share a
/// `(symbol, end_ts)`, the one appearing later in `bars` wins.
pub fn normalize_bars(bars: &[ProviderBar]) -> NormalizedSeries {
    let mut by_symbol: BTreeMap<String, BTreeMap<i64, OhlcBar>> = BTreeMap::new();
    let mut report: BTreeMap<String, NormalizeStats> = BTreeMap::new();

    for bar in bars {
        let stats = report.entry(bar.symbol.clone()).or_default();
        if !bar.is_complete {
            stats.incomplete += 1;
            continue;
        }
        match normalize_bar(bar) {
            Ok(ohlc) => {
                let slot = by_symbol.entry(bar.symbol.clone()).or_default();
                if slot.insert(bar.end_ts, ohlc).is_some() {
                    stats.duplicates += 1;
                }
            }
            Err(_) => stats.rejected += 1,
        }
    }

    let series: BTreeMap<String, Vec<OhlcBar>> = by_symbol
        .into_iter()
        .map(|(sym, m)| (sym, m.into_values().collect::<Vec<_>>()))
        .collect();
    for (sym, v) in &series {
        if let Some(stats) = report.get_mut(sym) {
            stats.accepted = v.len();
        }
    }

    NormalizedSeries { series, report }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate_ohlc(open: f64, high: f64, low: f64, close: f64) -> Result<(), NormalizerError> {
    if low > high {
        return Err(NormalizerError::OhlcViolation(format!(
            "low ({low}) > high ({high})"
        )));
    }
    if low > open.min(close) {
        return Err(NormalizerError::OhlcViolation(format!(
            "low ({low}) above open/close ({open}/{close})"
        )));
    }
    if high < open.max(close) {
        return Err(NormalizerError::OhlcViolation(format!(
            "high ({high}) below open/close ({open}/{close})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
