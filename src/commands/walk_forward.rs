use crate::cancellation::CancellationFlag;
use crate::commands::market_data_snapshot::load_market_data;
use crate::config::{start_of_day_utc, PipelineSettings};
use crate::models::RunMode;
use crate::predictor::PredictorConfig;
use crate::regression::RidgeFactory;
use crate::trainer::TrainerConfig;
use crate::walk_forward::{run_walk_forward, WalkForwardConfig, WalkForwardResult};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_WEIGHTS_FILE: &str = "weights.json";

/// Command-line overrides. `None` keeps the snapshot setting.
#[derive(Debug, Clone, Default)]
pub struct WalkForwardOptions {
    pub train_period: Option<usize>,
    pub retrain_interval: Option<usize>,
    pub retrain_interval_after_submit: Option<usize>,
    pub lookback_period: Option<usize>,
    pub predict_each_day: Option<bool>,
    pub start_date: Option<NaiveDate>,
    pub submission: bool,
    pub ridge_alpha: Option<f64>,
}

pub fn build_config(
    settings: &PipelineSettings,
    options: &WalkForwardOptions,
) -> Result<WalkForwardConfig> {
    let start_date = options
        .start_date
        .or(settings.backtest_start_date)
        .map(start_of_day_utc)
        .transpose()?;
    let defaults = WalkForwardConfig::default();

    Ok(WalkForwardConfig {
        train_period: options.train_period.unwrap_or(settings.train_period),
        retrain_interval: options.retrain_interval.unwrap_or(settings.retrain_interval),
        retrain_interval_after_submit: options
            .retrain_interval_after_submit
            .unwrap_or(settings.retrain_interval_after_submit),
        predict_each_day: options
            .predict_each_day
            .unwrap_or(settings.predict_each_day),
        lookback_period: options.lookback_period.unwrap_or(settings.lookback_period),
        start_date,
        mode: if options.submission {
            RunMode::Submission
        } else {
            RunMode::Backtest
        },
        trainer: TrainerConfig {
            min_samples: settings.min_training_samples,
            ..defaults.trainer
        },
        predictor: PredictorConfig {
            min_rows: settings.min_prediction_rows,
            ..defaults.predictor
        },
        show_progress: true,
    })
}

pub async fn run(
    data_file: &Path,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
    options: WalkForwardOptions,
    cancel: CancellationFlag,
) -> Result<()> {
    let market_data = load_market_data(data_file).await?;
    let settings = market_data.pipeline_settings()?;
    let config = build_config(&settings, &options)?;
    let factory = RidgeFactory {
        alpha: options.ridge_alpha.unwrap_or(settings.ridge_alpha),
    };
    let series = market_data.to_price_series()?;

    info!(
        "Walk-forward over {} assets and {} dates (train {} rows, retrain every {} rows, lookback {} rows, {})",
        series.asset_names().len(),
        series.len(),
        config.train_period,
        config.active_retrain_interval(),
        config.lookback_period,
        if config.predict_each_day {
            "daily prediction"
        } else {
            "batch prediction"
        }
    );

    let result = tokio::task::spawn_blocking(move || {
        run_walk_forward(&series, &config, &factory, &cancel)
    })
    .await
    .context("Walk-forward worker panicked")??;

    let weights_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS_FILE));
    write_outputs(&result, &weights_path, report.as_deref())
}

/// Writes the weights tensor, the optional JSON report and the summary line.
pub fn write_outputs(
    result: &WalkForwardResult,
    weights_path: &Path,
    report_path: Option<&Path>,
) -> Result<()> {
    if result.weights.has_non_finite() {
        return Err(anyhow!("Weights tensor contains non-finite values"));
    }
    result.weights.save_json(weights_path)?;
    info!("Weights written to {}", weights_path.display());

    if let Some(path) = report_path {
        write_report(result, path)?;
        info!("Report written to {}", path.display());
    }

    let summary = result.report.summary();
    if summary.training_failed > 0 || summary.predictions_failed > 0 {
        warn!(
            "{} training and {} prediction failures; affected weights stay at zero",
            summary.training_failed, summary.predictions_failed
        );
    }
    match serde_json::to_string(&summary) {
        Ok(payload) => println!("WALKFORWARD_SUMMARY={payload}"),
        Err(err) => warn!("Failed to serialize walk-forward summary: {err}"),
    }
    Ok(())
}

fn write_report(result: &WalkForwardResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory {}", parent.display())
            })?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Unable to create report at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &result.report)
        .context("Failed to serialize walk-forward report")?;
    writer.flush().context("Failed to flush report to disk")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn options_override_snapshot_settings() {
        let settings = PipelineSettings {
            train_period: 500,
            lookback_period: 200,
            backtest_start_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            min_training_samples: 30,
            ..PipelineSettings::default()
        };
        let options = WalkForwardOptions {
            train_period: Some(250),
            start_date: NaiveDate::from_ymd_opt(2021, 3, 15),
            submission: true,
            ..WalkForwardOptions::default()
        };

        let config = build_config(&settings, &options).expect("config");

        assert_eq!(config.train_period, 250);
        assert_eq!(config.lookback_period, 200);
        assert_eq!(
            config.start_date,
            Some(Utc.with_ymd_and_hms(2021, 3, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(config.mode, RunMode::Submission);
        assert_eq!(config.active_retrain_interval(), 1);
        assert_eq!(config.trainer.min_samples, 30);
        assert_eq!(config.predictor.min_rows, 1);
    }

    #[test]
    fn daily_prediction_can_be_switched_off_from_the_command_line() {
        let settings = PipelineSettings {
            predict_each_day: true,
            retrain_interval_after_submit: 5,
            ..PipelineSettings::default()
        };

        let inherited = build_config(&settings, &WalkForwardOptions::default()).expect("config");
        assert!(inherited.predict_each_day);
        assert_eq!(inherited.retrain_interval_after_submit, 5);

        let options = WalkForwardOptions {
            predict_each_day: Some(false),
            retrain_interval_after_submit: Some(20),
            submission: true,
            ..WalkForwardOptions::default()
        };
        let config = build_config(&settings, &options).expect("config");
        assert!(!config.predict_each_day);
        assert_eq!(config.active_retrain_interval(), 20);
    }
}
