//! CSV-backed historical provider.
//!
//! ## CSV column contract (case-insensitive, order-independent)
//!
//! | Column        | Example      | Notes                                |
//! |---------------|--------------|--------------------------------------|
//! | `symbol`      | `AAPL`       |                                      |
//! | `timeframe`   | `1D`         | Must match the request timeframe     |
//! | `end_ts`      | `1708041600` | UTC epoch seconds                    |
//! | `open`        | `182.34`     | Decimal string                       |
//! | `high`        | `185.00`     |                                      |
//! | `low`         | `181.00`     |                                      |
//! | `close`       | `184.50`     |                                      |
//! | `volume`      | `1000000`    | Integer                              |
//! | `is_complete` | `true`       | Optional; defaults to `true`         |

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{FetchBarsRequest, HistoricalProvider, ProviderBar};

const REQUIRED_COLUMNS: &[&str] = &[
    "symbol",
    "timeframe",
    "end_ts",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

/// Structural CSV errors. Bad individual rows are skipped, not errors.
#[derive(Debug)]
pub enum CsvIngestError {
    Io(String),
    MissingHeader(String),
}

impl fmt::Display for CsvIngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvIngestError::Io(msg) => write!(f, "csv io error: {msg}"),
            CsvIngestError::MissingHeader(col) => {
                write!(f, "csv missing required header column: '{col}'")
            }
        }
    }
}

impl std::error::Error for CsvIngestError {}

#[derive(Debug, Deserialize)]
struct CsvRow {
    symbol: String,
    timeframe: String,
    end_ts: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: i64,
    #[serde(default)]
    is_complete: Option<String>,
}

/// Parsed rows plus the number of rows that could not be decoded.
#[derive(Debug, Clone, Default)]
pub struct CsvParseOutcome {
    pub bars: Vec<ProviderBar>,
    pub rows_skipped: usize,
}

/// Parse `true/false/1/0/yes/no` (case-insensitive).
fn parse_is_complete(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse CSV text into provider bars.
pub fn parse_csv_str(src: &str) -> Result<CsvParseOutcome, CsvIngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(src.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| CsvIngestError::Io(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Ok(CsvParseOutcome::default());
    }
    let lowered: csv::StringRecord = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
    for req in REQUIRED_COLUMNS {
        if !lowered.iter().any(|h| h == *req) {
            return Err(CsvIngestError::MissingHeader((*req).to_string()));
        }
    }
    rdr.set_headers(lowered.clone());

    let mut out = CsvParseOutcome::default();
    for rec in rdr.records() {
        let rec = match rec {
            Ok(r) => r,
            Err(_) => {
                out.rows_skipped += 1;
                continue;
            }
        };
        let row: CsvRow = match rec.deserialize(Some(&lowered)) {
            Ok(r) => r,
            Err(_) => {
                out.rows_skipped += 1;
                continue;
            }
        };
        let is_complete = match row.is_complete.as_deref() {
            None | Some("") => true,
            Some(s) => match parse_is_complete(s) {
                Some(v) => v,
                None => {
                    out.rows_skipped += 1;
                    continue;
                }
            },
        };
        out.bars.push(ProviderBar {
            symbol: row.symbol,
            timeframe: row.timeframe,
            end_ts: row.end_ts,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            is_complete,
        });
    }

    Ok(out)
}

/// Serves bars from a single CSV file holding every symbol.
#[derive(Debug, Clone)]
pub struct CsvBarsProvider {
    path: PathBuf,
}

impl CsvBarsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl HistoricalProvider for CsvBarsProvider {
    fn source_name(&self) -> &'static str {
        "csv"
    }

    async fn fetch_bars(&self, req: FetchBarsRequest) -> Result<Vec<ProviderBar>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read bars csv failed: {}", self.path.display()))?;
        let parsed = parse_csv_str(&raw)
            .with_context(|| format!("parse bars csv failed: {}", self.path.display()))?;

        let (lo, hi) = req.ts_window();
        let tf = req.timeframe.as_str();
        Ok(parsed
            .bars
            .into_iter()
            .filter(|b| req.symbols.iter().any(|s| s == &b.symbol))
            .filter(|b| b.timeframe.eq_ignore_ascii_case(tf))
            .filter(|b| b.end_ts >= lo && b.end_ts <= hi)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_case_insensitive_and_order_independent() {
        let src = "Close,SYMBOL,timeframe,End_Ts,open,high,low,volume\n\
                   11,AAA,1D,100,10,12,9,500\n";
        let out = parse_csv_str(src).unwrap();
        assert_eq!(out.bars.len(), 1);
        assert_eq!(out.bars[0].close, "11");
        assert_eq!(out.bars[0].symbol, "AAA");
        assert!(out.bars[0].is_complete);
    }

    #[test]
    fn missing_header_is_structural_error() {
        let err = parse_csv_str("symbol,timeframe,end_ts,open,high,low\nA,1D,1,1,1,1\n")
            .unwrap_err();
        assert!(matches!(err, CsvIngestError::MissingHeader(ref c) if c == "close"));
    }

    #[test]
    fn bad_rows_are_skipped_and_counted() {
        let src = "symbol,timeframe,end_ts,open,high,low,close,volume,is_complete\n\
                   AAA,1D,100,10,12,9,11,500,true\n\
                   AAA,1D,notanumber,10,12,9,11,500,true\n\
                   AAA,1D,200,10,12,9,11,500,maybe\n\
                   AAA,1D,300,10,12,9,11,500,no\n";
        let out = parse_csv_str(src).unwrap();
        assert_eq!(out.bars.len(), 2);
        assert_eq!(out.rows_skipped, 2);
        assert!(!out.bars[1].is_complete);
    }

    #[test]
    fn empty_input_is_empty_outcome() {
        let out = parse_csv_str("").unwrap();
        assert!(out.bars.is_empty());
    }
}
