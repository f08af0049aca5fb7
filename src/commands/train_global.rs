use crate::cancellation::CancellationFlag;
use crate::commands::market_data_snapshot::load_market_data;
use crate::commands::walk_forward::write_outputs;
use crate::predictor::PredictorConfig;
use crate::regression::RidgeFactory;
use crate::trainer::TrainerConfig;
use crate::walk_forward::run_global_diagnostic;
use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

pub const DEFAULT_GLOBAL_WEIGHTS_FILE: &str = "weights-global.json";

/// Diagnostic run: fits on the full history and scores the same rows.
pub async fn run(
    data_file: &Path,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
    cancel: CancellationFlag,
) -> Result<()> {
    let market_data = load_market_data(data_file).await?;
    let settings = market_data.pipeline_settings()?;
    let series = market_data.to_price_series()?;
    let trainer = TrainerConfig {
        min_samples: settings.min_training_samples,
        ..TrainerConfig::default()
    };
    let predictor = PredictorConfig {
        min_rows: settings.min_prediction_rows,
        ..PredictorConfig::default()
    };
    let factory = RidgeFactory {
        alpha: settings.ridge_alpha,
    };

    info!(
        "Global diagnostic over {} assets and {} dates",
        series.asset_names().len(),
        series.len()
    );
    let result = tokio::task::spawn_blocking(move || {
        run_global_diagnostic(&series, &trainer, &predictor, &factory, &cancel)
    })
    .await
    .context("Global training worker panicked")??;

    let weights_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_GLOBAL_WEIGHTS_FILE));
    write_outputs(&result, &weights_path, report.as_deref())
}
