//! `pfa recommend`: one cycle, printed.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use pfa_config::ConfigMode;
use pfa_engine::{CycleReport, RetryPolicy, Scheduler};
use pfa_md::CsvBarsProvider;
use serde::Serialize;
use uuid::Uuid;

use super::{holdings_source, load_engine_config, parse_as_of, print_record};

pub struct RecommendArgs {
    pub config_paths: Vec<String>,
    pub holdings: Option<String>,
    pub bars: String,
    pub as_of: Option<String>,
    pub json: bool,
}

#[derive(Serialize)]
struct RecordJson<'a> {
    cycle_id: Uuid,
    as_of: NaiveDate,
    #[serde(flatten)]
    report: &'a CycleReport,
}

pub async fn recommend(args: RecommendArgs) -> Result<()> {
    let (loaded, cfg) = load_engine_config(&args.config_paths, ConfigMode::Once)?;
    let as_of = parse_as_of(args.as_of.as_deref())?;

    // A one-shot command fails fast instead of waiting out retry delays.
    let scheduler = Scheduler::new(
        cfg,
        loaded.config_hash,
        Arc::new(CsvBarsProvider::new(&args.bars)),
        holdings_source(args.holdings),
    )?
    .with_retry(RetryPolicy::none());

    let rec = scheduler.run_once(as_of).await?;

    if args.json {
        let out = RecordJson {
            cycle_id: rec.cycle_id,
            as_of: rec.as_of,
            report: &rec.report,
        };
        let s = serde_json::to_string_pretty(&out).context("serialize cycle report failed")?;
        println!("{s}");
    } else {
        print_record(&rec);
    }

    Ok(())
}
