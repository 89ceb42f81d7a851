//! Scenario: CSV provider filters by symbol, timeframe and date window, and
//! normalisation drops partial and malformed bars.

use std::io::Write;

use chrono::NaiveDate;
use pfa_md::{normalize_bars, CsvBarsProvider, FetchBarsRequest, HistoricalProvider, Timeframe};

// 2026-10-01..=2026-10-03 00:00 UTC bar ends.
const D1: i64 = 1_790_812_800;
const DAY: i64 = 86_400;

fn write_csv(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

#[tokio::test]
async fn scenario_csv_provider_window_and_normalize() {
    let body = format!(
        "symbol,timeframe,end_ts,open,high,low,close,volume,is_complete\n\
         AAA,1D,{d0},10,11,9,10.5,100,true\n\
         AAA,1D,{d1},10.5,12,10,11,100,true\n\
         AAA,1D,{d2},11,12,10,11.5,100,false\n\
         AAA,1m,{d1},10,11,9,10.5,100,true\n\
         BBB,1D,{d1},20,21,19,-1,100,true\n\
         BBB,1D,{d2},20,21,19,20.5,100,true\n\
         CCC,1D,{d1},5,6,4,5,100,true\n\
         AAA,1D,{late},11,12,10,11.5,100,true\n",
        d0 = D1,
        d1 = D1 + DAY,
        d2 = D1 + 2 * DAY,
        late = D1 + 40 * DAY,
    );
    let file = write_csv(&body);
    let provider = CsvBarsProvider::new(file.path());
    assert_eq!(provider.source_name(), "csv");

    let req = FetchBarsRequest {
        symbols: vec!["AAA".into(), "BBB".into()],
        timeframe: Timeframe::D1,
        start: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2026, 10, 3).unwrap(),
    };
    let raw = provider.fetch_bars(req).await.unwrap();

    // CCC not requested, 1m row filtered, late row outside the window.
    assert_eq!(raw.len(), 5);
    assert!(raw.iter().all(|b| b.symbol != "CCC"));

    let norm = normalize_bars(&raw);
    assert_eq!(norm.bars("AAA").len(), 2);
    assert_eq!(norm.report["AAA"].incomplete, 1);
    assert_eq!(norm.bars("BBB").len(), 1);
    assert_eq!(norm.report["BBB"].rejected, 1);
}

#[tokio::test]
async fn scenario_csv_provider_missing_file_is_error() {
    let provider = CsvBarsProvider::new("/nonexistent/bars.csv");
    let req = FetchBarsRequest::lookback(
        vec!["AAA".into()],
        Timeframe::D1,
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
        30,
    );
    let err = provider.fetch_bars(req).await.unwrap_err();
    assert!(format!("{err:#}").contains("read bars csv failed"));
}
