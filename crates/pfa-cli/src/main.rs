use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "pfa")]
#[command(about = "Portfolio allocation engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> account -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Run one optimisation cycle and print the recommendations
    Recommend {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Holdings ledger (YAML or JSON). No holdings when omitted.
        #[arg(long)]
        holdings: Option<String>,

        /// Bars CSV (symbol,timeframe,end_ts,open,high,low,close,volume)
        #[arg(long)]
        bars: String,

        /// Cycle date YYYY-MM-DD (default: today, UTC)
        #[arg(long = "as-of")]
        as_of: Option<String>,

        /// Print the full cycle report as JSON instead of key=value lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Repeat cycles on the configured scheduler interval
    Schedule {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Holdings ledger, re-read every cycle
        #[arg(long)]
        holdings: Option<String>,

        /// Bars CSV, re-read every cycle
        #[arg(long)]
        bars: String,

        /// Stop after this many ticks (default: run until interrupted)
        #[arg(long = "max-cycles")]
        max_cycles: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent when missing.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = pfa_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Recommend {
            config_paths,
            holdings,
            bars,
            as_of,
            json,
        } => {
            commands::recommend::recommend(commands::recommend::RecommendArgs {
                config_paths,
                holdings,
                bars,
                as_of,
                json,
            })
            .await?;
        }

        Commands::Schedule {
            config_paths,
            holdings,
            bars,
            max_cycles,
        } => {
            commands::schedule::schedule(config_paths, holdings, bars, max_cycles).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays parseable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
