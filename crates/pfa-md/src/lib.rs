//! pfa-md
//!
//! Market-data boundary for the allocation engine.
//!
//! This crate owns the provider abstraction, a CSV-backed provider and the
//! normalisation of raw decimal-string bars into float [`OhlcBar`]s. The
//! engine itself never calls into this crate; the scheduler and CLI fetch
//! bars here and hand the engine an immutable snapshot.
//!
//! [`OhlcBar`]: pfa_schemas::OhlcBar

pub mod csv_provider;
pub mod normalizer;

pub use csv_provider::{parse_csv_str, CsvBarsProvider, CsvIngestError, CsvParseOutcome};
pub use normalizer::{
    normalize_bar, normalize_bars, NormalizeStats, NormalizedSeries, NormalizerError,
};

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Supported timeframe identifiers. Only `1D` bars are annualised by the
/// risk estimator; intraday frames are accepted for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    D1,
    M1,
    M5,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::D1 => "1D",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" => Ok(Timeframe::D1),
            "1m" | "1min" | "1minute" => Ok(Timeframe::M1),
            "5m" | "5min" | "5minute" => Ok(Timeframe::M5),
            other => Err(anyhow!(
                "invalid timeframe '{}'. expected one of: 1D | 1m | 5m",
                other
            )),
        }
    }
}

/// A raw OHLCV bar as returned by a provider.
///
/// Prices stay decimal strings until [`normalize_bars`] so every provider
/// goes through the same parsing and sanity rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBar {
    pub symbol: String,
    pub timeframe: String,
    /// Bar end timestamp (epoch seconds, UTC).
    pub end_ts: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: i64,
    /// `false` for a live/partial bar; such bars never reach the engine.
    pub is_complete: bool,
}

/// Fetch request for a provider.
#[derive(Debug, Clone)]
pub struct FetchBarsRequest {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    /// Inclusive start date (UTC).
    pub start: NaiveDate,
    /// Inclusive end date (UTC).
    pub end: NaiveDate,
}

impl FetchBarsRequest {
    /// `lookback_days` of history ending at `as_of` (inclusive).
    pub fn lookback(
        symbols: Vec<String>,
        timeframe: Timeframe,
        as_of: NaiveDate,
        lookback_days: u32,
    ) -> Self {
        let start = as_of - chrono::Duration::days(i64::from(lookback_days));
        Self {
            symbols,
            timeframe,
            start,
            end: as_of,
        }
    }

    /// Inclusive epoch-second window covered by this request.
    pub fn ts_window(&self) -> (i64, i64) {
        let start = self.start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end = self
            .end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(i64::MAX);
        (start, end)
    }
}

/// Pluggable historical provider interface.
#[async_trait::async_trait]
pub trait HistoricalProvider: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_bars(&self, req: FetchBarsRequest) -> Result<Vec<ProviderBar>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parse() {
        assert_eq!(Timeframe::parse("1D").unwrap(), Timeframe::D1);
        assert_eq!(Timeframe::parse("1m").unwrap(), Timeframe::M1);
        assert_eq!(Timeframe::parse("5min").unwrap(), Timeframe::M5);
        assert!(Timeframe::parse("15m").is_err());
    }

    #[test]
    fn lookback_window_is_inclusive() {
        let as_of = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let req = FetchBarsRequest::lookback(vec!["AAA".into()], Timeframe::D1, as_of, 10);
        assert_eq!(req.start, NaiveDate::from_ymd_opt(2026, 10, 5).unwrap());
        let (lo, hi) = req.ts_window();
        assert_eq!(hi - lo, 11 * 86_400 - 1);
    }
}
