use std::collections::HashMap;
use std::sync::Mutex;

use walkforward::cancellation::CancellationFlag;
use walkforward::commands::walk_forward::write_outputs;
use walkforward::data_context::MarketData;
use walkforward::error::PipelineError;
use walkforward::models::{FeatureChannel, FeatureRow, PriceBar};
use walkforward::predictor::PredictorConfig;
use walkforward::regression::{ModelError, ModelFactory, Regressor, RidgeFactory};
use walkforward::series::PriceSeries;
use walkforward::synthetic::{asset_name, generate_bars, SyntheticConfig};
use walkforward::trainer::{train_models, TrainOutcome, TrainerConfig};
use walkforward::walk_forward::{run_global_diagnostic, run_walk_forward, WalkForwardConfig};
use walkforward::weights::WeightsTensor;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn synthetic_bars(assets: usize, days: usize) -> Vec<PriceBar> {
    generate_bars(&SyntheticConfig {
        assets,
        days,
        seed: 11,
        ..SyntheticConfig::default()
    })
}

fn synthetic_series(assets: usize, days: usize) -> PriceSeries {
    PriceSeries::from_bars(&synthetic_bars(assets, days)).expect("series")
}

fn schedule(train_period: usize, retrain_interval: usize, lookback: usize) -> WalkForwardConfig {
    WalkForwardConfig {
        train_period,
        retrain_interval,
        lookback_period: lookback,
        ..WalkForwardConfig::default()
    }
}

/// Fails every fit for one asset and delegates the rest to ridge.
struct FailingForAsset {
    asset: String,
    inner: RidgeFactory,
}

impl ModelFactory for FailingForAsset {
    fn fit(
        &self,
        asset: &str,
        features: &[FeatureRow],
        targets: &[f64],
    ) -> Result<Box<dyn Regressor>, ModelError> {
        if asset == self.asset {
            return Err(ModelError::Other(format!("refusing to fit {}", asset)));
        }
        self.inner.fit(asset, features, targets)
    }
}

/// Scores each row with its price channel, which does not depend on where the
/// prediction window starts.
struct PriceEcho;

impl Regressor for PriceEcho {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ModelError> {
        Ok(rows
            .iter()
            .map(|row| row[FeatureChannel::Price.index()])
            .collect())
    }

    fn describe(&self) -> String {
        "price-echo".to_string()
    }
}

struct PriceEchoFactory;

impl ModelFactory for PriceEchoFactory {
    fn fit(
        &self,
        _asset: &str,
        _features: &[FeatureRow],
        _targets: &[f64],
    ) -> Result<Box<dyn Regressor>, ModelError> {
        Ok(Box::new(PriceEcho))
    }
}

/// Records every training set it is handed.
#[derive(Default)]
struct RecordingFactory {
    seen: Mutex<Vec<(String, Vec<FeatureRow>, Vec<f64>)>>,
}

impl ModelFactory for RecordingFactory {
    fn fit(
        &self,
        asset: &str,
        features: &[FeatureRow],
        targets: &[f64],
    ) -> Result<Box<dyn Regressor>, ModelError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((asset.to_string(), features.to_vec(), targets.to_vec()));
        }
        RidgeFactory::default().fit(asset, features, targets)
    }
}

#[test]
fn three_assets_over_four_hundred_days_get_finite_weights() {
    init_logger();
    let series = synthetic_series(3, 400);
    let config = schedule(200, 100, 120);

    let result = run_walk_forward(
        &series,
        &config,
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("walk-forward");

    let report = &result.report;
    assert_eq!(report.cycles.len(), 2);
    for cycle in &report.cycles {
        assert_eq!(cycle.training.trained_count(), 3);
        assert_eq!(cycle.prediction.predicted_count(), 3);
    }
    assert!(!report.forward_looking);

    let weights = &result.weights;
    assert!(!weights.has_non_finite());
    assert_eq!(report.summary().weights_written, 3 * 200);
    assert!(weights.row(199).expect("row").iter().all(|w| *w == 0.0));
    assert!(weights.row(200).expect("row").iter().any(|w| *w != 0.0));
    assert!(weights.row(399).expect("row").iter().any(|w| *w != 0.0));
}

#[test]
fn failing_asset_keeps_zero_weights_while_others_train() {
    init_logger();
    let series = synthetic_series(5, 300);
    let failing = asset_name(2);
    let factory = FailingForAsset {
        asset: failing.clone(),
        inner: RidgeFactory::default(),
    };

    let training = train_models(
        &series.slice(0..200),
        &TrainerConfig::default(),
        &factory,
        &CancellationFlag::new(),
    )
    .expect("training");
    assert_eq!(training.models.len(), 4);
    assert_eq!(training.report.failed_count(), 1);
    assert!(matches!(
        training.report.outcome_for(&failing),
        Some(TrainOutcome::Failed { .. })
    ));

    let result = run_walk_forward(
        &series,
        &schedule(200, 1000, 150),
        &factory,
        &CancellationFlag::new(),
    )
    .expect("walk-forward");

    let summary = result.report.summary();
    assert_eq!(summary.training_failed, 1);
    assert_eq!(summary.models_trained, 4);
    for row in 200..300 {
        assert_eq!(result.weights.get(row, &failing), Some(0.0));
        assert_ne!(result.weights.get(row, &asset_name(0)), Some(0.0));
    }
}

#[test]
fn late_listed_asset_is_skipped_until_it_has_history() {
    init_logger();
    let mut bars = synthetic_bars(2, 300);
    let dates: Vec<_> = {
        let series = PriceSeries::from_bars(&bars).expect("series");
        series.dates().to_vec()
    };
    let late: Vec<PriceBar> = bars
        .iter()
        .filter(|bar| bar.asset == asset_name(0) && bar.date >= dates[250])
        .map(|bar| PriceBar {
            asset: "LATE".to_string(),
            ..bar.clone()
        })
        .collect();
    bars.extend(late);
    let series = PriceSeries::from_bars(&bars).expect("series");

    let result = run_walk_forward(
        &series,
        &schedule(200, 40, 150),
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("walk-forward");

    let first = &result.report.cycles[0];
    assert!(matches!(
        first.training.outcome_for("LATE"),
        Some(TrainOutcome::SkippedInsufficientData { samples: 0, required: 10 })
    ));
    assert!((200..300).all(|row| result.weights.get(row, "LATE") == Some(0.0)));
    assert!(!result.weights.has_non_finite());
}

#[test]
fn missing_bar_leaves_its_weight_at_zero() {
    let mut bars = synthetic_bars(2, 300);
    let gap_date = PriceSeries::from_bars(&bars).expect("series").dates()[250];
    bars.retain(|bar| !(bar.asset == asset_name(0) && bar.date == gap_date));
    let series = PriceSeries::from_bars(&bars).expect("series");

    let result = run_walk_forward(
        &series,
        &schedule(200, 1000, 150),
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("walk-forward");

    assert_eq!(result.weights.get(250, &asset_name(0)), Some(0.0));
    assert_ne!(result.weights.get(250, &asset_name(1)), Some(0.0));
    assert_ne!(result.weights.get(249, &asset_name(0)), Some(0.0));
    assert!(!result.weights.has_non_finite());
}

#[test]
fn training_never_sees_rows_at_or_after_the_cutoff() {
    init_logger();
    let bars = synthetic_bars(1, 260);
    let cutoff = 200;
    let series = PriceSeries::from_bars(&bars).expect("series");
    let cutoff_date = series.dates()[cutoff];

    // Same history, wildly different future.
    let altered: Vec<PriceBar> = bars
        .iter()
        .map(|bar| {
            if bar.date >= cutoff_date {
                PriceBar {
                    open: bar.open * 3.0,
                    high: bar.high * 3.0,
                    low: bar.low * 3.0,
                    close: bar.close * 3.0,
                    ..bar.clone()
                }
            } else {
                bar.clone()
            }
        })
        .collect();
    let altered_series = PriceSeries::from_bars(&altered).expect("series");

    let config = schedule(cutoff, 1000, 100);
    let original = RecordingFactory::default();
    let changed = RecordingFactory::default();
    run_walk_forward(&series, &config, &original, &CancellationFlag::new()).expect("original");
    run_walk_forward(&altered_series, &config, &changed, &CancellationFlag::new())
        .expect("altered");

    let original_seen = original.seen.lock().expect("lock");
    let changed_seen = changed.seen.lock().expect("lock");
    assert_eq!(original_seen.len(), 1);
    assert_eq!(*original_seen, *changed_seen);
    // Rows 60..=198 carry features and a label inside [0, 200).
    assert_eq!(original_seen[0].1.len(), 139);
}

#[test]
fn retraining_cycles_do_not_overlap() {
    let series = synthetic_series(2, 330);
    let result = run_walk_forward(
        &series,
        &schedule(150, 60, 100),
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("walk-forward");

    let cycles = &result.report.cycles;
    assert_eq!(cycles.len(), 3);
    for pair in cycles.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        assert_eq!(current.train.end, current.cutoff);
        assert!(current.predict.end <= next.cutoff);
        assert!(next.train.end - 1 >= current.cutoff);
    }
    assert_eq!(cycles[0].cutoff_date, Some(series.dates()[150]));
}

#[test]
fn daily_and_batch_prediction_agree() {
    let series = synthetic_series(3, 260);
    let batch = schedule(150, 50, 100);
    let daily = WalkForwardConfig {
        predict_each_day: true,
        ..batch.clone()
    };

    let batch_result =
        run_walk_forward(&series, &batch, &PriceEchoFactory, &CancellationFlag::new())
            .expect("batch");
    let daily_result =
        run_walk_forward(&series, &daily, &PriceEchoFactory, &CancellationFlag::new())
            .expect("daily");

    assert_eq!(batch_result.weights, daily_result.weights);
    assert_eq!(batch_result.report.summary().weights_written, 3 * 110);
}

#[test]
fn raised_min_rows_still_writes_weights_in_both_modes() {
    let series = synthetic_series(2, 300);
    let mut batch = schedule(200, 50, 150);
    batch.predictor = PredictorConfig {
        min_rows: 5,
        ..PredictorConfig::default()
    };
    let daily = WalkForwardConfig {
        predict_each_day: true,
        ..batch.clone()
    };

    for config in [&batch, &daily] {
        let result = run_walk_forward(
            &series,
            config,
            &RidgeFactory::default(),
            &CancellationFlag::new(),
        )
        .expect("walk-forward");

        assert_eq!(result.report.summary().weights_written, 2 * 100);
        assert!(result
            .weights
            .row(299)
            .expect("row")
            .iter()
            .all(|w| *w != 0.0));
    }
}

#[test]
fn identical_inputs_give_identical_weights() {
    let series = synthetic_series(3, 300);
    let config = schedule(180, 60, 120);

    let first = run_walk_forward(
        &series,
        &config,
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("first");
    let second = run_walk_forward(
        &series,
        &config,
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("second");

    assert_eq!(first.weights, second.weights);
}

#[test]
fn global_diagnostic_is_flagged_forward_looking() {
    init_logger();
    let series = synthetic_series(2, 200);

    let result = run_global_diagnostic(
        &series,
        &TrainerConfig::default(),
        &PredictorConfig::default(),
        &RidgeFactory::default(),
        &CancellationFlag::new(),
    )
    .expect("diagnostic");

    assert!(result.report.forward_looking);
    assert!(result.report.summary().forward_looking);
    assert_eq!(result.report.cycles.len(), 1);
    assert_eq!(result.report.cycles[0].train, 0..200);
    assert_eq!(result.report.cycles[0].predict, 0..200);
    // Every complete row from the warm-up on is scored.
    assert_eq!(result.report.summary().weights_written, 2 * 140);
}

#[test]
fn cancellation_aborts_the_run() {
    let series = synthetic_series(2, 300);
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let result = run_walk_forward(
        &series,
        &schedule(150, 50, 100),
        &RidgeFactory::default(),
        &cancel,
    );
    assert!(matches!(result, Err(PipelineError::Cancelled)));
}

#[test]
fn snapshot_to_weights_file() {
    init_logger();
    let data_path =
        std::env::temp_dir().join(format!("walkforward-data-{}.bin", uuid::Uuid::new_v4()));
    let weights_path =
        std::env::temp_dir().join(format!("walkforward-weights-{}.json", uuid::Uuid::new_v4()));
    let report_path =
        std::env::temp_dir().join(format!("walkforward-report-{}.json", uuid::Uuid::new_v4()));

    let mut settings = HashMap::new();
    settings.insert("TRAIN_PERIOD".to_string(), "150".to_string());
    settings.insert("RETRAIN_INTERVAL".to_string(), "75".to_string());
    settings.insert("LOOKBACK_PERIOD".to_string(), "90".to_string());
    MarketData::from_bars(synthetic_bars(2, 300), settings)
        .save_to_file(&data_path)
        .expect("save snapshot");

    let market_data = MarketData::load_from_file(&data_path).expect("load snapshot");
    let pipeline = market_data.pipeline_settings().expect("settings");
    let series = market_data.to_price_series().expect("series");
    let config = schedule(
        pipeline.train_period,
        pipeline.retrain_interval,
        pipeline.lookback_period,
    );
    let result = run_walk_forward(
        &series,
        &config,
        &RidgeFactory {
            alpha: pipeline.ridge_alpha,
        },
        &CancellationFlag::new(),
    )
    .expect("walk-forward");

    write_outputs(&result, &weights_path, Some(&report_path)).expect("write outputs");
    let restored = WeightsTensor::load_json(&weights_path).expect("load weights");
    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&report_path).expect("read report"))
            .expect("report json");

    for path in [&data_path, &weights_path, &report_path] {
        let _ = std::fs::remove_file(path);
    }

    assert_eq!(restored.dates(), result.weights.dates());
    assert_eq!(restored.assets(), result.weights.assets());
    for row in 0..restored.dates().len() {
        let written = result.weights.row(row).expect("row");
        let read = restored.row(row).expect("row");
        for (a, b) in written.iter().zip(read.iter()) {
            assert!((a - b).abs() <= 1e-12 * a.abs().max(1.0));
        }
    }
    assert_eq!(report["cycles"].as_array().map(|c| c.len()), Some(2));
    assert_eq!(report["forward_looking"], serde_json::Value::Bool(false));
    assert_eq!(report["cycles"][0]["predict"]["start"], 150);
}
