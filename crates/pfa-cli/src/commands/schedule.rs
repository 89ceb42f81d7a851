//! `pfa schedule`: repeat cycles on the configured interval.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use pfa_config::ConfigMode;
use pfa_engine::Scheduler;
use pfa_md::CsvBarsProvider;
use pfa_schemas::Action;

use super::{holdings_source, load_engine_config};

pub async fn schedule(
    config_paths: Vec<String>,
    holdings: Option<String>,
    bars: String,
    max_cycles: Option<u64>,
) -> Result<()> {
    let (loaded, cfg) = load_engine_config(&config_paths, ConfigMode::Scheduled)?;
    if cfg.scheduler.is_none() {
        bail!("schedule requires a `scheduler` config section (interval_secs, ...)");
    }

    let scheduler = Scheduler::new(
        cfg,
        loaded.config_hash,
        Arc::new(CsvBarsProvider::new(bars)),
        holdings_source(holdings),
    )?;
    println!(
        "schedule_started=true interval_secs={} max_retries={} retry_delay_secs={}",
        scheduler.interval().as_secs(),
        scheduler.retry().max_retries,
        scheduler.retry().delay.as_secs()
    );

    let ticks = scheduler
        .run_loop(
            max_cycles,
            || Utc::now().date_naive(),
            |result| match result {
                Ok(rec) => {
                    let buys = rec
                        .report
                        .recommendations
                        .iter()
                        .filter(|r| r.action == Action::Buy)
                        .count();
                    println!(
                        "cycle_id={} as_of={} solver_tier={} buys={} total_new_investment={:.2}",
                        rec.cycle_id,
                        rec.as_of,
                        rec.report
                            .diagnostics
                            .solver_tier
                            .map(|t| t.as_str())
                            .unwrap_or("none"),
                        buys,
                        rec.report.summary.total_new_investment
                    );
                }
                Err(e) => println!("cycle_failed=true error={e}"),
            },
        )
        .await?;

    println!("schedule_stopped=true ticks={ticks}");
    Ok(())
}
