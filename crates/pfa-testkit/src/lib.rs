//! Deterministic fixtures for cross-crate scenario tests.
//!
//! - synthetic daily bar series (seeded, no RNG crate, no clock)
//! - conversion to raw provider bars and CSV files
//! - in-memory and flaky [`HistoricalProvider`]s
//! - minimal engine configs

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use pfa_config::{EngineConfig, OptimizationConfig};
use pfa_md::{FetchBarsRequest, HistoricalProvider, ProviderBar};
use pfa_schemas::OhlcBar;

pub const DAY_SECS: i64 = 86_400;

/// Midnight UTC of `date` as epoch seconds.
pub fn day_ts(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Shape of a synthetic series.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSpec {
    pub seed: u64,
    pub start_price: f64,
    /// Mean daily return.
    pub drift: f64,
    /// Half-width of the uniform daily noise.
    pub noise: f64,
}

impl SeriesSpec {
    pub fn new(seed: u64, start_price: f64, drift: f64, noise: f64) -> Self {
        Self {
            seed,
            start_price,
            drift,
            noise,
        }
    }
}

/// `n` daily bars, the last one stamped at midnight UTC of `last_day`.
///
/// Same `SeriesSpec`, same bars. Noise comes from a 64-bit LCG so fixtures never
/// depend on an RNG crate's stream.
pub fn daily_series(spec: SeriesSpec, n: usize, last_day: NaiveDate) -> Vec<OhlcBar> {
    let last_ts = day_ts(last_day);
    let mut state = spec.seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    let mut prev = spec.start_price;
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let u = (state >> 11) as f64 / (1u64 << 53) as f64;
        let step = spec.drift + spec.noise * (2.0 * u - 1.0);
        let close = prev * (1.0 + step);
        let high = prev.max(close) * 1.004;
        let low = prev.min(close) * 0.996;
        let end_ts = last_ts - (n - 1 - i) as i64 * DAY_SECS;
        out.push(OhlcBar::new(end_ts, prev, high, low, close, 10_000.0));
        prev = close;
    }
    out
}

/// Raw provider rows for `bars`, prices rendered with 6 decimals.
pub fn provider_bars(symbol: &str, bars: &[OhlcBar]) -> Vec<ProviderBar> {
    bars.iter()
        .map(|b| ProviderBar {
            symbol: symbol.to_string(),
            timeframe: "1D".to_string(),
            end_ts: b.end_ts,
            open: format!("{:.6}", b.open),
            high: format!("{:.6}", b.high),
            low: format!("{:.6}", b.low),
            close: format!("{:.6}", b.close),
            volume: b.volume as i64,
            is_complete: true,
        })
        .collect()
}

/// Write rows in the CSV layout read by `pfa_md::CsvBarsProvider`.
pub fn write_bars_csv(path: &Path, rows: &[ProviderBar]) -> Result<()> {
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("create bars csv: {}", path.display()))?;
    w.write_record([
        "symbol",
        "timeframe",
        "end_ts",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "is_complete",
    ])?;
    for r in rows {
        w.write_record([
            r.symbol.as_str(),
            r.timeframe.as_str(),
            r.end_ts.to_string().as_str(),
            r.open.as_str(),
            r.high.as_str(),
            r.low.as_str(),
            r.close.as_str(),
            r.volume.to_string().as_str(),
            if r.is_complete { "true" } else { "false" },
        ])?;
    }
    w.flush().context("flush bars csv")?;
    Ok(())
}

/// Config with documented defaults, no sold ledger, no scheduler section.
pub fn fixture_config(symbols: &[&str], capital: f64, target_return: f64) -> EngineConfig {
    EngineConfig::new(
        OptimizationConfig::new(capital, target_return),
        symbols.iter().map(|s| s.to_string()).collect(),
    )
}

// ─── Providers ───────────────────────────────────────────────────────────────

/// Serves a fixed set of rows, filtered like the CSV provider.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    rows: Vec<ProviderBar>,
}

impl StaticProvider {
    pub fn new(rows: Vec<ProviderBar>) -> Self {
        Self { rows }
    }
}

#[async_trait::async_trait]
impl HistoricalProvider for StaticProvider {
    fn source_name(&self) -> &'static str {
        "static"
    }

    async fn fetch_bars(&self, req: FetchBarsRequest) -> Result<Vec<ProviderBar>> {
        let (lo, hi) = req.ts_window();
        Ok(self
            .rows
            .iter()
            .filter(|b| req.symbols.contains(&b.symbol))
            .filter(|b| b.timeframe.eq_ignore_ascii_case(req.timeframe.as_str()))
            .filter(|b| b.end_ts >= lo && b.end_ts <= hi)
            .cloned()
            .collect())
    }
}

/// Fails the first `fail_first` calls, then delegates.
pub struct FlakyProvider {
    inner: Arc<dyn HistoricalProvider>,
    fail_first: u32,
    calls: AtomicU32,
}

impl FlakyProvider {
    pub fn new(inner: Arc<dyn HistoricalProvider>, fail_first: u32) -> Self {
        Self {
            inner,
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HistoricalProvider for FlakyProvider {
    fn source_name(&self) -> &'static str {
        "flaky"
    }

    async fn fetch_bars(&self, req: FetchBarsRequest) -> Result<Vec<ProviderBar>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(anyhow!("simulated provider outage (call {n})"));
        }
        self.inner.fetch_bars(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn series_is_deterministic_and_well_formed() {
        let spec = SeriesSpec::new(7, 50.0, 0.001, 0.02);
        let a = daily_series(spec, 30, d(2026, 10, 15));
        let b = daily_series(spec, 30, d(2026, 10, 15));
        assert_eq!(a, b);
        assert_eq!(a.last().unwrap().end_ts, day_ts(d(2026, 10, 15)));
        for w in a.windows(2) {
            assert_eq!(w[1].end_ts - w[0].end_ts, DAY_SECS);
            assert_eq!(w[1].open, w[0].close);
        }
        for bar in &a {
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low > 0.0);
        }
        assert_ne!(a, daily_series(SeriesSpec::new(8, 50.0, 0.001, 0.02), 30, d(2026, 10, 15)));
    }

    #[test]
    fn provider_rows_normalize_back() {
        let bars = daily_series(SeriesSpec::new(1, 20.0, 0.0, 0.01), 5, d(2026, 10, 15));
        let rows = provider_bars("AAA", &bars);
        let norm = pfa_md::normalize_bars(&rows);
        assert_eq!(norm.bars("AAA").len(), 5);
        assert!((norm.bars("AAA")[4].close - bars[4].close).abs() < 1e-6);
    }
}
