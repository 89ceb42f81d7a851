//! Typed engine configuration.
//!
//! Every section rejects unknown keys. Defaults exist only for keys that are
//! absent; a present value that is out of range fails [`EngineConfig::validate`].

use std::collections::BTreeSet;

use pfa_schemas::SoldRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ConfigError;

pub const DEFAULT_PER_INSTRUMENT_CAP: f64 = 0.4;
pub const DEFAULT_RISK_PER_TRADE: f64 = 0.02;
pub const DEFAULT_ATR_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_COOLING_PERIOD_DAYS: u32 = 30;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.05;
pub const DEFAULT_VOLATILITY: f64 = 0.10;
pub const DEFAULT_REFINE_MAX_ROUNDS: u32 = 20;

const DEFAULT_LOOKBACK_DAYS: u32 = 365;
const DEFAULT_MAX_FETCH_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

const MIN_INTERVAL_SECS: u64 = 900;
const MAX_INTERVAL_SECS: u64 = 86_400;

const KNOWN_TIMEFRAMES: &[&str] = &["1D", "1m", "5m"];

fn default_cap() -> f64 {
    DEFAULT_PER_INSTRUMENT_CAP
}
fn default_risk_per_trade() -> f64 {
    DEFAULT_RISK_PER_TRADE
}
fn default_atr_multiplier() -> f64 {
    DEFAULT_ATR_MULTIPLIER
}
fn default_cooling() -> u32 {
    DEFAULT_COOLING_PERIOD_DAYS
}
fn default_rf() -> f64 {
    DEFAULT_RISK_FREE_RATE
}
fn default_vol() -> f64 {
    DEFAULT_VOLATILITY
}
fn default_rounds() -> u32 {
    DEFAULT_REFINE_MAX_ROUNDS
}
fn default_lookback() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}
fn default_timeframe() -> String {
    "1D".to_string()
}
fn default_retries() -> u32 {
    DEFAULT_MAX_FETCH_RETRIES
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

/// Optimization and sizing parameters for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Cash available before sale proceeds.
    pub capital: f64,
    /// Annual return the target-constrained solve must hit exactly.
    pub target_return: f64,
    /// Hard upper bound on any single weight.
    #[serde(default = "default_cap")]
    pub per_instrument_cap: f64,
    /// Fraction of capital that one stop-out may lose.
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
    #[serde(default = "default_cooling")]
    pub cooling_period_days: u32,
    #[serde(default = "default_rf")]
    pub risk_free_rate: f64,
    /// Volatility assigned to instruments without enough return history.
    #[serde(default = "default_vol")]
    pub default_volatility: f64,
    /// Greedy refinement budget (one round buys one share).
    #[serde(default = "default_rounds")]
    pub refine_max_rounds: u32,
}

impl OptimizationConfig {
    /// Config with the documented defaults for everything but the two
    /// required fields.
    pub fn new(capital: f64, target_return: f64) -> Self {
        Self {
            capital,
            target_return,
            per_instrument_cap: DEFAULT_PER_INSTRUMENT_CAP,
            risk_per_trade: DEFAULT_RISK_PER_TRADE,
            atr_multiplier: DEFAULT_ATR_MULTIPLIER,
            cooling_period_days: DEFAULT_COOLING_PERIOD_DAYS,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            default_volatility: DEFAULT_VOLATILITY,
            refine_max_rounds: DEFAULT_REFINE_MAX_ROUNDS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.capital.is_finite() || self.capital < 0.0 {
            return Err(ConfigError::field(
                "engine.capital",
                format!("must be finite and >= 0 (got {})", self.capital),
            ));
        }
        if !self.target_return.is_finite() || self.target_return <= -1.0 {
            return Err(ConfigError::field(
                "engine.target_return",
                format!("must be finite and > -1 (got {})", self.target_return),
            ));
        }
        let cap = self.per_instrument_cap;
        if !cap.is_finite() || cap <= 0.0 || cap > 1.0 {
            return Err(ConfigError::field(
                "engine.per_instrument_cap",
                format!("must be in (0, 1] (got {cap})"),
            ));
        }
        let r = self.risk_per_trade;
        if !r.is_finite() || !(0.0..=1.0).contains(&r) {
            return Err(ConfigError::field(
                "engine.risk_per_trade",
                format!("must be in [0, 1] (got {r})"),
            ));
        }
        if !self.atr_multiplier.is_finite() || self.atr_multiplier <= 0.0 {
            return Err(ConfigError::field(
                "engine.atr_multiplier",
                format!("must be finite and > 0 (got {})", self.atr_multiplier),
            ));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(ConfigError::field("engine.risk_free_rate", "must be finite"));
        }
        if !self.default_volatility.is_finite() || self.default_volatility <= 0.0 {
            return Err(ConfigError::field(
                "engine.default_volatility",
                format!("must be finite and > 0 (got {})", self.default_volatility),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniverseConfig {
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketDataConfig {
    #[serde(default = "default_lookback")]
    pub lookback_days: u32,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            timeframe: default_timeframe(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    #[serde(default = "default_retries")]
    pub max_fetch_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// The complete typed configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub engine: OptimizationConfig,
    pub universe: UniverseConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// Sold-instrument ledger.
    #[serde(default)]
    pub sold: Vec<SoldRecord>,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

impl EngineConfig {
    /// Minimal config for a universe; no sold ledger, no scheduler.
    pub fn new(engine: OptimizationConfig, symbols: Vec<String>) -> Self {
        Self {
            engine,
            universe: UniverseConfig { symbols },
            market_data: MarketDataConfig::default(),
            sold: Vec::new(),
            scheduler: None,
        }
    }

    /// Deserialize from the merged JSON document, then validate.
    pub fn from_json(v: &Value) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = serde_json::from_value(v.clone())
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        if self.universe.symbols.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        let mut seen = BTreeSet::new();
        for s in &self.universe.symbols {
            if s.trim().is_empty() {
                return Err(ConfigError::field(
                    "universe.symbols",
                    "symbol must not be empty",
                ));
            }
            if !seen.insert(s.as_str()) {
                return Err(ConfigError::DuplicateSymbol { symbol: s.clone() });
            }
        }

        if self.market_data.lookback_days == 0 {
            return Err(ConfigError::field("market_data.lookback_days", "must be > 0"));
        }
        if !KNOWN_TIMEFRAMES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(self.market_data.timeframe.trim()))
        {
            return Err(ConfigError::field(
                "market_data.timeframe",
                format!(
                    "unknown timeframe '{}' (expected 1D | 1m | 5m)",
                    self.market_data.timeframe
                ),
            ));
        }

        for (index, rec) in self.sold.iter().enumerate() {
            if rec.symbol.trim().is_empty() {
                return Err(ConfigError::InvalidSoldRecord {
                    index,
                    reason: "symbol must not be empty".into(),
                });
            }
            if !rec.sale_price.is_finite() || rec.sale_price < 0.0 {
                return Err(ConfigError::InvalidSoldRecord {
                    index,
                    reason: format!("sale_price must be finite and >= 0 (got {})", rec.sale_price),
                });
            }
        }

        if let Some(s) = &self.scheduler {
            if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&s.interval_secs) {
                return Err(ConfigError::field(
                    "scheduler.interval_secs",
                    format!(
                        "must be in {MIN_INTERVAL_SECS}..={MAX_INTERVAL_SECS} (got {})",
                        s.interval_secs
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Cash plus every sale's proceeds.
    pub fn available_capital(&self) -> f64 {
        self.engine.capital + self.sold.iter().map(|s| s.sale_price).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base() -> EngineConfig {
        EngineConfig::new(
            OptimizationConfig::new(10_000.0, 0.12),
            vec!["AAA".into(), "BBB".into()],
        )
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = OptimizationConfig::new(1.0, 0.1);
        assert_eq!(c.per_instrument_cap, 0.4);
        assert_eq!(c.risk_per_trade, 0.02);
        assert_eq!(c.atr_multiplier, 2.0);
        assert_eq!(c.cooling_period_days, 30);
        assert_eq!(c.refine_max_rounds, 20);
        assert!(base().validate().is_ok());
    }

    #[test]
    fn negative_capital_is_rejected_not_defaulted() {
        let mut c = base();
        c.engine.capital = -1.0;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "engine.capital"));
        assert!(err.to_string().starts_with("CONFIG_INVALID"));
    }

    #[test]
    fn cap_out_of_range_is_rejected() {
        for bad in [0.0, -0.1, 1.01, f64::NAN] {
            let mut c = base();
            c.engine.per_instrument_cap = bad;
            assert!(c.validate().is_err(), "cap {bad} must be rejected");
        }
    }

    #[test]
    fn duplicate_and_empty_universe_rejected() {
        let mut c = base();
        c.universe.symbols = vec![];
        assert_eq!(c.validate().unwrap_err(), ConfigError::EmptyUniverse);

        let mut c = base();
        c.universe.symbols = vec!["AAA".into(), "AAA".into()];
        assert_eq!(
            c.validate().unwrap_err(),
            ConfigError::DuplicateSymbol {
                symbol: "AAA".into()
            }
        );
    }

    #[test]
    fn available_capital_adds_sale_proceeds() {
        let mut c = base();
        c.sold.push(SoldRecord {
            symbol: "CCC".into(),
            sale_price: 2_500.0,
            sale_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        });
        assert_eq!(c.available_capital(), 12_500.0);
    }

    #[test]
    fn negative_sale_price_rejected() {
        let mut c = base();
        c.sold.push(SoldRecord {
            symbol: "CCC".into(),
            sale_price: -5.0,
            sale_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        });
        assert!(matches!(
            c.validate().unwrap_err(),
            ConfigError::InvalidSoldRecord { index: 0, .. }
        ));
    }

    #[test]
    fn scheduler_interval_bounds_enforced() {
        let mut c = base();
        c.scheduler = Some(SchedulerConfig {
            interval_secs: 60,
            max_fetch_retries: 3,
            retry_delay_secs: 5,
        });
        assert!(c.validate().is_err());
        c.scheduler = Some(SchedulerConfig {
            interval_secs: 900,
            max_fetch_retries: 3,
            retry_delay_secs: 5,
        });
        assert!(c.validate().is_ok());
    }

    #[test]
    fn from_json_rejects_unknown_keys() {
        let v = serde_json::json!({
            "engine": {"capital": 1000.0, "target_return": 0.1, "leverage": 2.0},
            "universe": {"symbols": ["A"]}
        });
        assert!(matches!(
            EngineConfig::from_json(&v).unwrap_err(),
            ConfigError::Malformed(_)
        ));
    }
}
