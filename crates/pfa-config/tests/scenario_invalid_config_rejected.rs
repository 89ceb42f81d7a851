//! Scenario: malformed or out-of-range configuration is fatal
//!
//! Invariants under test:
//! 1. Unknown keys in any section are rejected (no silent pass-through).
//! 2. Out-of-range values are rejected, never replaced by defaults.
//! 3. Absent optional keys take the documented defaults.
//! 4. Sold-ledger dates parse from plain YAML dates.

use chrono::NaiveDate;
use pfa_config::{load_layered_yaml_from_strings, ConfigError};

fn load(yaml: &str) -> Result<pfa_config::EngineConfig, ConfigError> {
    load_layered_yaml_from_strings(&[yaml])
        .expect("yaml itself is well-formed")
        .engine_config()
}

#[test]
fn unknown_top_level_section_rejected() {
    let err = load(
        r#"
engine: {capital: 1000.0, target_return: 0.1}
universe: {symbols: [AAA]}
news: {enabled: true}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Malformed(_)), "{err}");
}

#[test]
fn negative_capital_rejected() {
    let err = load(
        r#"
engine: {capital: -10.0, target_return: 0.1}
universe: {symbols: [AAA]}
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("engine.capital"), "{err}");
}

#[test]
fn zero_atr_multiplier_rejected() {
    let err = load(
        r#"
engine: {capital: 10.0, target_return: 0.1, atr_multiplier: 0.0}
universe: {symbols: [AAA]}
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("engine.atr_multiplier"), "{err}");
}

#[test]
fn negative_cooling_days_fail_to_deserialize() {
    let err = load(
        r#"
engine: {capital: 10.0, target_return: 0.1, cooling_period_days: -1}
universe: {symbols: [AAA]}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Malformed(_)));
}

#[test]
fn missing_required_target_return_rejected() {
    let err = load(
        r#"
engine: {capital: 10.0}
universe: {symbols: [AAA]}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Malformed(_)));
}

#[test]
fn absent_keys_take_defaults_and_sold_dates_parse() {
    let cfg = load(
        r#"
engine: {capital: 10000.0, target_return: 0.2}
universe: {symbols: [AAA, BBB]}
sold:
  - {symbol: CCC, sale_price: 1500.0, sale_date: 2026-10-05}
"#,
    )
    .unwrap();
    assert_eq!(cfg.engine.per_instrument_cap, 0.4);
    assert_eq!(cfg.engine.cooling_period_days, 30);
    assert_eq!(cfg.market_data.lookback_days, 365);
    assert_eq!(cfg.market_data.timeframe, "1D");
    assert_eq!(
        cfg.sold[0].sale_date,
        NaiveDate::from_ymd_opt(2026, 10, 5).unwrap()
    );
    assert_eq!(cfg.available_capital(), 11_500.0);
    assert!(cfg.scheduler.is_none());
}
