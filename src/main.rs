use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use walkforward::{
    cancellation::CancellationFlag,
    commands::{synthesize, train_global, walk_forward},
    config::parse_date,
};

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "walkforward")]
#[command(about = "Per-asset walk-forward training and portfolio weight prediction")]
struct Cli {
    /// Worker threads for per-asset training and prediction (defaults to the CPU count)
    #[arg(long, global = true)]
    threads: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrain per-asset models on a rolling schedule and write out-of-sample weights
    WalkForward {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Destination for the weights JSON (defaults to weights.json)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Destination for the per-cycle JSON report
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
        /// Rows of history each model is fit on
        #[arg(long)]
        train_period: Option<usize>,
        /// Rows between retraining events in backtest mode
        #[arg(long)]
        retrain_interval: Option<usize>,
        /// Rows of history handed to the feature extractor at prediction time
        #[arg(long)]
        lookback_period: Option<usize>,
        /// Rows between retraining events in submission mode
        #[arg(long)]
        retrain_interval_after_submit: Option<usize>,
        /// Predict one day at a time (`--predict-each-day false` forces batch mode)
        #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
        predict_each_day: Option<bool>,
        /// First date to receive weights (YYYY-MM-DD)
        #[arg(long, value_parser = parse_start_date)]
        start_date: Option<NaiveDate>,
        /// Use the post-submission retraining interval
        #[arg(long)]
        submission: bool,
        /// L2 penalty of the ridge regressor
        #[arg(long)]
        ridge_alpha: Option<f64>,
    },
    /// Diagnostic only: fit on the full history and score the same rows (forward-looking)
    TrainGlobal {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Destination for the weights JSON (defaults to weights-global.json)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Destination for the JSON report
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },
    /// Write a seeded random-walk market data snapshot
    Synthesize {
        /// Destination file for the snapshot (.json for JSON, anything else for bincode)
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Number of assets
        #[arg(long, default_value_t = 5)]
        assets: usize,
        /// Number of trading days per asset
        #[arg(long, default_value_t = 1000)]
        days: usize,
        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { threads, command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let threads = threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .map_err(|err| anyhow!("Failed to configure worker pool: {err}"))?;
    info!("Using {} worker threads", threads);

    let cancel = CancellationFlag::new();
    spawn_interrupt_listener(cancel.clone());

    match command {
        Commands::WalkForward {
            data_file,
            output,
            report,
            train_period,
            retrain_interval,
            retrain_interval_after_submit,
            lookback_period,
            predict_each_day,
            start_date,
            submission,
            ridge_alpha,
        } => {
            let market_data_path = resolve_market_data_path(data_file);
            let options = walk_forward::WalkForwardOptions {
                train_period,
                retrain_interval,
                retrain_interval_after_submit,
                lookback_period,
                predict_each_day,
                start_date,
                submission,
                ridge_alpha,
            };
            walk_forward::run(&market_data_path, output, report, options, cancel).await?;
        }
        Commands::TrainGlobal {
            data_file,
            output,
            report,
        } => {
            let market_data_path = resolve_market_data_path(data_file);
            train_global::run(&market_data_path, output, report, cancel).await?;
        }
        Commands::Synthesize {
            output,
            assets,
            days,
            seed,
        } => {
            let output_path = resolve_market_data_path(output);
            synthesize::run(&output_path, assets, days, seed).await?;
        }
    }

    Ok(())
}

fn spawn_interrupt_listener(cancel: CancellationFlag) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received; stopping after the current asset");
                cancel.cancel();
            }
            Err(err) => warn!("Interrupt handler unavailable: {err}"),
        }
    });
}

fn parse_start_date(raw: &str) -> Result<NaiveDate, String> {
    parse_date("start-date", raw).map_err(|err| err.to_string())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
