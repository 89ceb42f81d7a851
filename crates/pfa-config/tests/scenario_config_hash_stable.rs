//! Scenario: config hash stability
//!
//! GREEN when:
//! - loading the same layers twice yields the same hash and canonical JSON
//! - reordering keys within a YAML document does not change the hash
//! - a changed value changes the hash
//! - overlay layers override base values before hashing

use pfa_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
engine:
  capital: 10000.0
  target_return: 0.15
  per_instrument_cap: 0.4
universe:
  symbols: [AAA, BBB, CCC]
"#;

const BASE_YAML_REORDERED: &str = r#"
universe:
  symbols: [AAA, BBB, CCC]
engine:
  per_instrument_cap: 0.4
  target_return: 0.15
  capital: 10000.0
"#;

const OVERLAY_YAML: &str = r#"
engine:
  target_return: 0.10
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64, "sha256 hex digest");
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_overrides_base_in_typed_config() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let cfg = loaded.engine_config().expect("valid config");
    assert!((cfg.engine.target_return - 0.10).abs() < 1e-12);
    assert_eq!(cfg.engine.capital, 10_000.0);
    assert_eq!(cfg.universe.symbols, vec!["AAA", "BBB", "CCC"]);
}

#[test]
fn load_from_files_matches_load_from_strings() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).unwrap();
    std::fs::write(&overlay, OVERLAY_YAML).unwrap();

    let from_files = pfa_config::load_layered_yaml(&[
        base.to_str().unwrap(),
        overlay.to_str().unwrap(),
    ])
    .unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}
