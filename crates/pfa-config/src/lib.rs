//! pfa-config
//!
//! Layered YAML configuration for the allocation engine:
//! - merge documents in order (later layers override earlier ones)
//! - canonical JSON + SHA-256 config hash
//! - unused-key report per run mode (see `consumption.rs`)
//! - typed, validated [`EngineConfig`] (see `engine.rs`)
//! - holdings ledger loader (see `holdings.rs`)

mod consumption;
mod engine;
mod error;
mod holdings;

pub use consumption::{report_unused_keys, ConfigMode, UnusedKeyPolicy, UnusedKeyReport};
pub use engine::{
    EngineConfig, MarketDataConfig, OptimizationConfig, SchedulerConfig, UniverseConfig,
    DEFAULT_ATR_MULTIPLIER, DEFAULT_COOLING_PERIOD_DAYS, DEFAULT_PER_INSTRUMENT_CAP,
    DEFAULT_REFINE_MAX_ROUNDS, DEFAULT_RISK_FREE_RATE, DEFAULT_RISK_PER_TRADE,
    DEFAULT_VOLATILITY,
};
pub use error::ConfigError;
pub use holdings::{load_holdings, parse_holdings_str, HoldingsLedger};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;

/// Merged config plus its identity.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    /// Compact JSON with keys sorted at every level.
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Deserialize and validate the typed engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        EngineConfig::from_json(&self.config_json)
    }
}

/// Read and merge YAML files in order (base first, overrides last).
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {i}"))?;
        let layer = serde_json::to_value(yaml).context("yaml->json conversion failed")?;
        overlay(&mut merged, layer);
    }

    // serde_json's default Map keeps keys sorted, so the rendering does not
    // depend on key order in the sources.
    let canonical_json =
        serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));

    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Mappings merge key by key; anything else (arrays included) is replaced.
/// A `null` value, an empty layer included, leaves the base untouched.
fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (k, v) in layer_map {
                match base_map.get_mut(&k) {
                    Some(slot) => overlay(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}
