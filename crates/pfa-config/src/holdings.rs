//! Holdings ledger loader.
//!
//! The ledger is owned by an external collaborator; this module only reads a
//! snapshot of it. YAML is a superset of JSON, so both formats parse here.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pfa_schemas::Holding;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoldingsLedger {
    #[serde(default)]
    pub holdings: Vec<Holding>,
}

impl HoldingsLedger {
    /// Symbol -> shares. Rejects duplicate symbols rather than summing them.
    pub fn to_map(&self) -> Result<BTreeMap<String, u64>, ConfigError> {
        let mut out = BTreeMap::new();
        for h in &self.holdings {
            if h.symbol.trim().is_empty() {
                return Err(ConfigError::field("holdings.symbol", "must not be empty"));
            }
            if out.insert(h.symbol.clone(), h.shares).is_some() {
                return Err(ConfigError::DuplicateSymbol {
                    symbol: h.symbol.clone(),
                });
            }
        }
        Ok(out)
    }
}

pub fn load_holdings(path: &Path) -> Result<HoldingsLedger> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read holdings ledger: {}", path.display()))?;
    parse_holdings_str(&raw)
        .with_context(|| format!("invalid holdings ledger: {}", path.display()))
}

pub fn parse_holdings_str(raw: &str) -> Result<HoldingsLedger> {
    if raw.trim().is_empty() {
        return Ok(HoldingsLedger::default());
    }
    let ledger: HoldingsLedger = serde_yaml::from_str(raw).context("holdings parse failed")?;
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_and_json() {
        let y = parse_holdings_str("holdings:\n  - {symbol: AAA, shares: 10}\n").unwrap();
        let j = parse_holdings_str(r#"{"holdings":[{"symbol":"AAA","shares":10}]}"#).unwrap();
        assert_eq!(y, j);
        assert_eq!(y.to_map().unwrap()["AAA"], 10);
    }

    #[test]
    fn negative_shares_fail_to_parse() {
        assert!(parse_holdings_str("holdings:\n  - {symbol: AAA, shares: -3}\n").is_err());
    }

    #[test]
    fn duplicate_symbols_rejected() {
        let l = parse_holdings_str(
            "holdings:\n  - {symbol: AAA, shares: 1}\n  - {symbol: AAA, shares: 2}\n",
        )
        .unwrap();
        assert!(matches!(
            l.to_map().unwrap_err(),
            ConfigError::DuplicateSymbol { .. }
        ));
    }

    #[test]
    fn empty_document_is_empty_ledger() {
        assert!(parse_holdings_str("  \n").unwrap().holdings.is_empty());
    }
}
