//! Scenario: unused keys are reported per run mode
//!
//! Validates:
//! 1) A `scheduler` section is unused in ONCE mode (warned, not an error).
//! 2) The same section is consumed in SCHEDULED mode.
//! 3) FAIL policy errors with CONFIG_UNUSED_KEYS.
//! 4) Unused pointers are sorted deterministically.

use pfa_config::{load_layered_yaml_from_strings, report_unused_keys, ConfigMode, UnusedKeyPolicy};

const YAML: &str = r#"
engine:
  capital: 5000.0
  target_return: 0.1
universe:
  symbols: [AAA]
scheduler:
  interval_secs: 3600
  retry_delay_secs: 30
"#;

#[test]
fn scheduler_section_unused_in_once_mode() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report =
        report_unused_keys(ConfigMode::Once, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert!(!report.is_clean());
    assert_eq!(
        report.unused_leaf_pointers,
        vec![
            "/scheduler/interval_secs".to_string(),
            "/scheduler/retry_delay_secs".to_string()
        ]
    );
}

#[test]
fn scheduler_section_consumed_in_scheduled_mode() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(
        ConfigMode::Scheduled,
        &loaded.config_json,
        UnusedKeyPolicy::Fail,
    )
    .expect("everything is consumed in scheduled mode");
    assert!(report.is_clean());
}

#[test]
fn fail_policy_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(ConfigMode::Once, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    assert!(format!("{err:?}").contains("CONFIG_UNUSED_KEYS"));
}
