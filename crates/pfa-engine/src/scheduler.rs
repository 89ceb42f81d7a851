//! Polling scheduler around [`run_cycle`].
//!
//! The engine itself stays a pure function. This module owns everything
//! around it: fetching bars with a bounded retry policy, normalising them,
//! snapshotting the holdings ledger and repeating on a fixed interval.
//! Nothing is carried from one cycle to the next.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pfa_config::{ConfigError, EngineConfig, SchedulerConfig};
use pfa_md::{normalize_bars, FetchBarsRequest, HistoricalProvider, ProviderBar, Timeframe};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cycle::{run_cycle, CycleError, CycleInputs, CycleReport, InstrumentData};

/// Interval used when the config has no `scheduler` section.
pub const DEFAULT_INTERVAL_SECS: u64 = 3_600;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

// ─── Holdings ────────────────────────────────────────────────────────────────

/// Source of a consistent holdings snapshot, read once per cycle.
pub trait HoldingsSource: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<BTreeMap<String, u64>>;
}

impl HoldingsSource for BTreeMap<String, u64> {
    fn snapshot(&self) -> anyhow::Result<BTreeMap<String, u64>> {
        Ok(self.clone())
    }
}

// ─── Retry ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            max_retries: cfg.max_fetch_retries,
            delay: Duration::from_secs(cfg.retry_delay_secs),
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    InvalidConfig(ConfigError),
    UnsupportedTimeframe(String),
    /// Every fetch attempt failed.
    DataUnavailable { attempts: u32, last_error: String },
    /// The holdings snapshot could not be read.
    Holdings(String),
    Cycle(CycleError),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "{e}"),
            Self::UnsupportedTimeframe(t) => write!(f, "unsupported timeframe '{t}'"),
            Self::DataUnavailable {
                attempts,
                last_error,
            } => write!(
                f,
                "DATA_UNAVAILABLE after {attempts} attempt(s): {last_error}"
            ),
            Self::Holdings(e) => write!(f, "holdings snapshot failed: {e}"),
            Self::Cycle(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Errors that end [`Scheduler::run_loop`] instead of skipping a tick.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidConfig(_) | Self::UnsupportedTimeframe(_) => true,
            Self::Cycle(e) => e.is_fatal(),
            Self::DataUnavailable { .. } | Self::Holdings(_) => false,
        }
    }
}

/// Fetch bars, retrying on error with a fixed delay.
pub async fn fetch_with_retry(
    provider: &dyn HistoricalProvider,
    req: &FetchBarsRequest,
    policy: RetryPolicy,
) -> Result<Vec<ProviderBar>, SchedulerError> {
    let total = policy.max_retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 1..=total {
        match provider.fetch_bars(req.clone()).await {
            Ok(bars) => {
                debug!(
                    source = provider.source_name(),
                    attempt,
                    bars = bars.len(),
                    "bars fetched"
                );
                return Ok(bars);
            }
            Err(e) => {
                last_error = format!("{e:#}");
                warn!(
                    source = provider.source_name(),
                    attempt,
                    of = total,
                    error = %last_error,
                    "bar fetch failed"
                );
                if attempt < total && !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(SchedulerError::DataUnavailable {
        attempts: total,
        last_error,
    })
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// One completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cycle_id: Uuid,
    pub as_of: NaiveDate,
    pub report: CycleReport,
}

/// Deterministic cycle id: same config and date, same id.
pub fn cycle_id(config_hash: &str, as_of: NaiveDate) -> Uuid {
    let data = format!("pfa-engine.cycle.v1|{config_hash}|{as_of}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}

pub struct Scheduler {
    config: EngineConfig,
    config_hash: String,
    timeframe: Timeframe,
    provider: Arc<dyn HistoricalProvider>,
    holdings: Arc<dyn HoldingsSource>,
    interval: Duration,
    retry: RetryPolicy,
}

impl Scheduler {
    /// Validates `config` up front. Interval and retry policy come from the
    /// `scheduler` section when present.
    pub fn new(
        config: EngineConfig,
        config_hash: impl Into<String>,
        provider: Arc<dyn HistoricalProvider>,
        holdings: Arc<dyn HoldingsSource>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let timeframe = Timeframe::parse(&config.market_data.timeframe)
            .map_err(|_| SchedulerError::UnsupportedTimeframe(config.market_data.timeframe.clone()))?;
        let (interval, retry) = match &config.scheduler {
            Some(s) => (Duration::from_secs(s.interval_secs), RetryPolicy::from_config(s)),
            None => (
                Duration::from_secs(DEFAULT_INTERVAL_SECS),
                RetryPolicy::default(),
            ),
        };
        Ok(Self {
            config,
            config_hash: config_hash.into(),
            timeframe,
            provider,
            holdings,
            interval,
            retry,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// fetch -> normalise -> snapshot -> [`run_cycle`].
    pub async fn run_once(&self, as_of: NaiveDate) -> Result<CycleRecord, SchedulerError> {
        let symbols = self.config.universe.symbols.clone();
        let req = FetchBarsRequest::lookback(
            symbols.clone(),
            self.timeframe,
            as_of,
            self.config.market_data.lookback_days,
        );
        let raw = fetch_with_retry(self.provider.as_ref(), &req, self.retry).await?;

        let normalized = normalize_bars(&raw);
        for (sym, stats) in &normalized.report {
            if stats.rejected > 0 || stats.incomplete > 0 || stats.duplicates > 0 {
                warn!(
                    symbol = %sym,
                    rejected = stats.rejected,
                    incomplete = stats.incomplete,
                    duplicates = stats.duplicates,
                    "bars dropped during normalisation"
                );
            }
        }

        let instruments = symbols
            .iter()
            .map(|s| InstrumentData::from_bars(s.clone(), normalized.bars(s).to_vec()))
            .collect();
        let holdings = self
            .holdings
            .snapshot()
            .map_err(|e| SchedulerError::Holdings(format!("{e:#}")))?;

        let inputs = CycleInputs {
            config: self.config.clone(),
            config_hash: self.config_hash.clone(),
            instruments,
            holdings,
            as_of,
        };
        let report = run_cycle(&inputs).map_err(SchedulerError::Cycle)?;
        let cycle_id = cycle_id(&self.config_hash, as_of);

        info!(
            %cycle_id,
            %as_of,
            tier = ?report.diagnostics.solver_tier,
            new_investment = report.summary.total_new_investment,
            "cycle complete"
        );
        Ok(CycleRecord {
            cycle_id,
            as_of,
            report,
        })
    }

    /// Run a cycle on every tick until `max_cycles` ticks have passed (or
    /// forever with `None`). A failed cycle is handed to `on_cycle` and the
    /// loop waits for the next tick; a fatal error ends the loop.
    ///
    /// Returns the number of ticks run.
    pub async fn run_loop<C, F>(
        &self,
        max_cycles: Option<u64>,
        mut as_of: C,
        mut on_cycle: F,
    ) -> Result<u64, SchedulerError>
    where
        C: FnMut() -> NaiveDate,
        F: FnMut(&Result<CycleRecord, SchedulerError>),
    {
        let mut ticker = tokio::time::interval(self.interval);
        let mut ticks = 0u64;

        while max_cycles.map_or(true, |m| ticks < m) {
            ticker.tick().await;
            ticks += 1;

            let result = self.run_once(as_of()).await;
            if let Err(e) = &result {
                warn!(tick = ticks, error = %e, "cycle failed");
            }
            on_cycle(&result);
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        Ok(ticks)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pfa_config::OptimizationConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Failing {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl HistoricalProvider for Failing {
        fn source_name(&self) -> &'static str {
            "failing"
        }

        async fn fetch_bars(&self, req: FetchBarsRequest) -> anyhow::Result<Vec<ProviderBar>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(anyhow!("upstream timeout #{n}"));
            }
            let (lo, _) = req.ts_window();
            Ok(req
                .symbols
                .iter()
                .flat_map(|s| {
                    (0..20).map(move |i| ProviderBar {
                        symbol: s.clone(),
                        timeframe: "1D".into(),
                        end_ts: lo + 86_400 * (i + 1),
                        open: "10".into(),
                        high: format!("{}", 10.5 + (i % 3) as f64 * 0.1),
                        low: "9.5".into(),
                        close: format!("{}", 10.0 + (i % 4) as f64 * 0.1),
                        volume: 100,
                        is_complete: true,
                    })
                })
                .collect())
        }
    }

    fn failing(fail_first: u32) -> Arc<Failing> {
        Arc::new(Failing {
            calls: AtomicU32::new(0),
            fail_first,
        })
    }

    fn config() -> EngineConfig {
        EngineConfig::new(
            OptimizationConfig::new(5_000.0, 0.1),
            vec!["AAA".into(), "BBB".into()],
        )
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        }
    }

    fn scheduler(p: Arc<Failing>) -> Scheduler {
        Scheduler::new(config(), "h1", p, Arc::new(BTreeMap::<String, u64>::new()))
            .unwrap()
            .with_retry(fast())
            .with_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retry_recovers_within_budget() {
        let p = failing(2);
        let req = FetchBarsRequest::lookback(vec!["AAA".into()], Timeframe::D1, as_of(), 30);
        let bars = fetch_with_retry(p.as_ref(), &req, fast()).await.unwrap();
        assert_eq!(bars.len(), 20);
        assert_eq!(p.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_attempts() {
        let p = failing(10);
        let req = FetchBarsRequest::lookback(vec!["AAA".into()], Timeframe::D1, as_of(), 30);
        let err = fetch_with_retry(p.as_ref(), &req, fast()).await.unwrap_err();
        match err {
            SchedulerError::DataUnavailable {
                attempts,
                ref last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("#3"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn run_once_is_deterministic_per_date() {
        let s = scheduler(failing(0));
        let a = s.run_once(as_of()).await.unwrap();
        let b = s.run_once(as_of()).await.unwrap();
        assert_eq!(a.cycle_id, b.cycle_id);
        assert_eq!(a.report, b.report);
        assert_eq!(a.cycle_id, cycle_id("h1", as_of()));
        assert_eq!(a.report.recommendations.len(), 2);
        assert_ne!(cycle_id("h1", as_of()), cycle_id("h2", as_of()));
    }

    #[tokio::test]
    async fn loop_survives_failed_tick() {
        // First tick exhausts 3 attempts; second tick succeeds.
        let s = scheduler(failing(3));
        let mut outcomes = Vec::new();
        let ticks = s
            .run_loop(Some(2), as_of, |r| outcomes.push(r.is_ok()))
            .await
            .unwrap();
        assert_eq!(ticks, 2);
        assert_eq!(outcomes, vec![false, true]);
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let mut c = config();
        c.engine.capital = f64::NAN;
        let err = Scheduler::new(c, "h", failing(0), Arc::new(BTreeMap::<String, u64>::new()))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn policy_from_config_section() {
        let p = RetryPolicy::from_config(&SchedulerConfig {
            interval_secs: 900,
            max_fetch_retries: 5,
            retry_delay_secs: 2,
        });
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.delay, Duration::from_secs(2));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
