//! Command handler modules for the `pfa` binary.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod recommend;
pub mod schedule;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use pfa_config::{
    report_unused_keys, ConfigMode, EngineConfig, LoadedConfig, UnusedKeyPolicy,
};
use pfa_engine::{CycleRecord, HoldingsSource};
use pfa_schemas::Recommendation;
use tracing::warn;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load the layered config, warn about keys this mode never reads, then
/// deserialize and validate.
pub fn load_engine_config(
    config_paths: &[String],
    mode: ConfigMode,
) -> Result<(LoadedConfig, EngineConfig)> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = pfa_config::load_layered_yaml(&path_refs)?;

    let report = report_unused_keys(mode, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    for p in &report.unused_leaf_pointers {
        warn!(mode = %report.mode, pointer = %p, "config key not read in this mode");
    }

    let cfg = loaded.engine_config()?;
    Ok((loaded, cfg))
}

/// `--as-of` or today's UTC date.
pub fn parse_as_of(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of '{s}' (expected YYYY-MM-DD)")),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Holdings ledger file, re-read on every snapshot.
pub struct HoldingsFile {
    path: PathBuf,
}

impl HoldingsSource for HoldingsFile {
    fn snapshot(&self) -> Result<BTreeMap<String, u64>> {
        let ledger = pfa_config::load_holdings(&self.path)?;
        Ok(ledger.to_map()?)
    }
}

/// A file-backed source when a path is given, otherwise no holdings.
pub fn holdings_source(path: Option<String>) -> Arc<dyn HoldingsSource> {
    match path {
        Some(p) => Arc::new(HoldingsFile {
            path: PathBuf::from(p),
        }),
        None => Arc::new(BTreeMap::<String, u64>::new()),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn rec_line(r: &Recommendation) -> String {
    format!(
        "rec symbol={} action={} current_shares={} final_shares={} shares_delta={} \
         price={:.4} weight={:.6} stop_loss_price={:.4} max_risk_amount={:.2} \
         expected_annual_gain={:.2} high_risk={} degraded={}",
        r.symbol,
        r.action,
        r.current_shares,
        r.final_shares,
        r.shares_delta,
        r.price,
        r.weight,
        r.stop_loss_price,
        r.max_risk_amount,
        r.expected_annual_gain,
        r.high_risk,
        r.degraded
    )
}

/// key=value rendering of one cycle.
pub fn print_record(rec: &CycleRecord) {
    let d = &rec.report.diagnostics;
    let s = &rec.report.summary;

    println!("cycle_id={}", rec.cycle_id);
    println!("as_of={}", rec.as_of);
    println!("config_hash={}", d.config_hash);
    println!(
        "solver_tier={}",
        d.solver_tier.map(|t| t.as_str()).unwrap_or("none")
    );
    println!("cap_relaxed={}", d.cap_relaxed);

    for r in &rec.report.recommendations {
        println!("{}", rec_line(r));
    }
    for (sym, reasons) in &d.degraded {
        let msgs: Vec<String> = reasons.iter().map(|x| x.to_string()).collect();
        println!("degraded symbol={} reasons={}", sym, msgs.join("; "));
    }

    println!(
        "summary available_capital={:.2} total_new_investment={:.2} cash_after_investment={:.2} \
         total_risk={:.2} portfolio_expected_return={} portfolio_volatility={} \
         portfolio_sharpe_estimate={} capital_utilization={}",
        s.available_capital,
        s.total_new_investment,
        s.cash_after_investment,
        s.total_risk,
        s.portfolio_expected_return,
        s.portfolio_volatility,
        s.portfolio_sharpe_estimate,
        s.capital_utilization
    );
}
