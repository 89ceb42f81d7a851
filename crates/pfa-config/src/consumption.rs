//! Unused-key guard.
//!
//! Every entry point reads whole top-level sections of the merged document,
//! so consumption is tracked per section. Any leaf outside the sections a
//! mode reads is reported as a JSON pointer (`/scheduler/interval_secs`).

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which entry point is reading the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// A single `recommend` cycle.
    Once,
    /// The polling scheduler loop.
    Scheduled,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Once => "ONCE",
            ConfigMode::Scheduled => "SCHEDULED",
        }
    }

    /// Top-level sections read in this mode. Must match what `EngineConfig`
    /// and the scheduler actually read.
    pub fn consumed_sections(&self) -> &'static [&'static str] {
        const ONCE: &[&str] = &["engine", "universe", "market_data", "sold"];
        const SCHEDULED: &[&str] = &["engine", "universe", "market_data", "sold", "scheduler"];
        match self {
            ConfigMode::Once => ONCE,
            ConfigMode::Scheduled => SCHEDULED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    pub consumed_sections: Vec<String>,
    /// Sorted, unique.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report leaves of `config_json` that `mode` never reads.
///
/// `Fail` turns a non-empty report into a `CONFIG_UNUSED_KEYS` error;
/// `Warn` always returns the report.
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<&str> = mode.consumed_sections().iter().copied().collect();

    let mut unused = BTreeSet::new();
    match config_json {
        Value::Object(sections) => {
            for (name, body) in sections {
                if !consumed.contains(name.as_str()) {
                    push_leaves(body, &mut vec![name.as_str().into()], &mut unused);
                }
            }
        }
        // A non-mapping document has nothing any mode reads.
        Value::Null => {}
        _ => {
            unused.insert("/".to_string());
        }
    }

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_sections: consumed.iter().map(|s| s.to_string()).collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let first: Vec<&str> = report
            .unused_leaf_pointers
            .iter()
            .take(12)
            .map(|s| s.as_str())
            .collect();
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} key(s) not read in this mode: {}",
            report.mode,
            report.unused_leaf_pointers.len(),
            first.join(", ")
        );
    }
    Ok(report)
}

/// Walk `v`, recording one pointer per scalar (or empty container).
fn push_leaves(v: &Value, path: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, child) in map {
                path.push(k.clone());
                push_leaves(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                push_leaves(child, path, out);
                path.pop();
            }
        }
        _ => {
            out.insert(to_pointer(path));
        }
    }
}

/// RFC 6901 rendering: `~` -> `~0`, `/` -> `~1`.
fn to_pointer(path: &[String]) -> String {
    path.iter().fold(String::new(), |mut acc, seg| {
        acc.push('/');
        acc.push_str(&seg.replace('~', "~0").replace('/', "~1"));
        acc
    })
}
