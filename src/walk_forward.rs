use crate::cancellation::CancellationFlag;
use crate::error::PipelineError;
use crate::models::RunMode;
use crate::predictor::{predict_weights, AssetWeights, PredictionReport, PredictorConfig};
use crate::regression::ModelFactory;
use crate::series::PriceSeries;
use crate::trainer::{train_models, TrainerConfig, TrainingReport};
use crate::weights::WeightsTensor;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use std::ops::Range;
use uuid::Uuid;

pub const DEFAULT_TRAIN_PERIOD: usize = 730;
pub const DEFAULT_RETRAIN_INTERVAL: usize = 3650;
pub const DEFAULT_RETRAIN_INTERVAL_AFTER_SUBMIT: usize = 1;
pub const DEFAULT_LOOKBACK_PERIOD: usize = 365;

/// Walk-forward schedule. Every period counts rows of the time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardConfig {
    pub train_period: usize,
    pub retrain_interval: usize,
    pub retrain_interval_after_submit: usize,
    pub predict_each_day: bool,
    pub lookback_period: usize,
    /// First date that receives weights. `None` starts once a full training
    /// window is available.
    pub start_date: Option<DateTime<Utc>>,
    pub mode: RunMode,
    pub trainer: TrainerConfig,
    pub predictor: PredictorConfig,
    pub show_progress: bool,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_period: DEFAULT_TRAIN_PERIOD,
            retrain_interval: DEFAULT_RETRAIN_INTERVAL,
            retrain_interval_after_submit: DEFAULT_RETRAIN_INTERVAL_AFTER_SUBMIT,
            predict_each_day: false,
            lookback_period: DEFAULT_LOOKBACK_PERIOD,
            start_date: None,
            mode: RunMode::Backtest,
            trainer: TrainerConfig::default(),
            predictor: PredictorConfig::default(),
            show_progress: false,
        }
    }
}

impl WalkForwardConfig {
    pub fn active_retrain_interval(&self) -> usize {
        match self.mode {
            RunMode::Backtest => self.retrain_interval,
            RunMode::Submission => self.retrain_interval_after_submit,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("train_period", self.train_period),
            ("retrain_interval", self.retrain_interval),
            (
                "retrain_interval_after_submit",
                self.retrain_interval_after_submit,
            ),
            ("lookback_period", self.lookback_period),
        ] {
            if value == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        if self.lookback_period <= self.predictor.features.warmup_period() {
            warn!(
                "lookback_period {} does not exceed the feature warm-up of {} rows; no weights will be produced",
                self.lookback_period,
                self.predictor.features.warmup_period()
            );
        }
        Ok(())
    }
}

/// One retraining event and the rows it is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CyclePlan {
    pub index: usize,
    pub cutoff: usize,
    pub train: Range<usize>,
    pub predict: Range<usize>,
}

pub fn plan_cycles(dates: &[DateTime<Utc>], config: &WalkForwardConfig) -> Vec<CyclePlan> {
    let len = dates.len();
    let first_cutoff = match config.start_date {
        Some(start) => dates.partition_point(|date| *date < start),
        None => config.train_period,
    }
    .max(1);
    let interval = config.active_retrain_interval().max(1);

    let mut plans = Vec::new();
    let mut cutoff = first_cutoff;
    while cutoff < len {
        let next_cutoff = cutoff.saturating_add(interval);
        plans.push(CyclePlan {
            index: plans.len(),
            cutoff,
            train: cutoff.saturating_sub(config.train_period)..cutoff,
            predict: cutoff..next_cutoff.min(len),
        });
        cutoff = next_cutoff;
    }
    plans
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub index: usize,
    pub cutoff: usize,
    pub cutoff_date: Option<DateTime<Utc>>,
    pub train: Range<usize>,
    pub predict: Range<usize>,
    pub training: TrainingReport,
    pub prediction: PredictionReport,
    pub weights_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub mode: RunMode,
    /// Set when models were fit on rows they later predicted.
    pub forward_looking: bool,
    pub asset_count: usize,
    pub date_count: usize,
    pub cycles: Vec<CycleReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkForwardSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub forward_looking: bool,
    pub cycles: usize,
    pub models_trained: usize,
    pub training_skipped: usize,
    pub training_failed: usize,
    pub predictions_failed: usize,
    pub weights_written: usize,
}

impl WalkForwardReport {
    fn new(series: &PriceSeries, mode: RunMode, forward_looking: bool) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            mode,
            forward_looking,
            asset_count: series.asset_names().len(),
            date_count: series.len(),
            cycles: Vec::new(),
        }
    }

    pub fn summary(&self) -> WalkForwardSummary {
        WalkForwardSummary {
            run_id: self.run_id.clone(),
            mode: self.mode,
            forward_looking: self.forward_looking,
            cycles: self.cycles.len(),
            models_trained: self.total(|cycle| cycle.training.trained_count()),
            training_skipped: self.total(|cycle| cycle.training.skipped_count()),
            training_failed: self.total(|cycle| cycle.training.failed_count()),
            predictions_failed: self.total(|cycle| cycle.prediction.failed_count()),
            weights_written: self.total(|cycle| cycle.weights_written),
        }
    }

    fn total<F>(&self, per_cycle: F) -> usize
    where
        F: Fn(&CycleReport) -> usize,
    {
        self.cycles.iter().map(per_cycle).sum()
    }
}

pub struct WalkForwardResult {
    pub weights: WeightsTensor,
    pub report: WalkForwardReport,
}

/// Runs every planned cycle: fit on the rows before the cutoff, then fill the
/// cycle's prediction rows of the weights tensor.
pub fn run_walk_forward(
    series: &PriceSeries,
    config: &WalkForwardConfig,
    factory: &dyn ModelFactory,
    cancel: &CancellationFlag,
) -> Result<WalkForwardResult, PipelineError> {
    config.validate()?;
    let plans = plan_cycles(series.dates(), config);
    let mut weights = WeightsTensor::new(series.dates().to_vec(), series.asset_names());
    let mut report = WalkForwardReport::new(series, config.mode, false);

    if plans.is_empty() {
        warn!(
            "No walk-forward cycles fit in {} rows; every weight stays at zero",
            series.len()
        );
        return Ok(WalkForwardResult { weights, report });
    }
    info!(
        "Running {} walk-forward cycles over {} assets ({} mode, retrain every {} rows)",
        plans.len(),
        report.asset_count,
        config.mode.as_str(),
        config.active_retrain_interval()
    );

    let progress = cycle_progress(plans.len(), config.show_progress);
    for plan in &plans {
        cancel.check()?;
        let cycle = run_cycle(series, plan, config, factory, &mut weights, cancel)?;
        log_cycle(&cycle);
        report.cycles.push(cycle);
        progress.inc(1);
    }
    progress.finish_with_message("Walk-forward completed");

    Ok(WalkForwardResult { weights, report })
}

fn run_cycle(
    series: &PriceSeries,
    plan: &CyclePlan,
    config: &WalkForwardConfig,
    factory: &dyn ModelFactory,
    weights: &mut WeightsTensor,
    cancel: &CancellationFlag,
) -> Result<CycleReport, PipelineError> {
    let training = train_models(
        &series.slice(plan.train.clone()),
        &config.trainer,
        factory,
        cancel,
    )?;

    let mut prediction = PredictionReport::default();
    let mut weights_written = 0;
    if config.predict_each_day {
        for row in plan.predict.clone() {
            let start = (row + 1).saturating_sub(config.lookback_period);
            let window = series.slice(start..row + 1);
            let run = predict_weights(
                &training.models,
                &window,
                (row - start)..(row - start + 1),
                &config.predictor,
                cancel,
            )?;
            weights_written += merge_buffers(weights, &run.buffers, start, &plan.predict)?;
            prediction.absorb(run.report);
        }
    } else {
        let start = (plan.predict.start + 1).saturating_sub(config.lookback_period);
        let window = series.slice(start..plan.predict.end);
        let run = predict_weights(
            &training.models,
            &window,
            (plan.predict.start - start)..(plan.predict.end - start),
            &config.predictor,
            cancel,
        )?;
        weights_written += merge_buffers(weights, &run.buffers, start, &plan.predict)?;
        prediction.absorb(run.report);
    }

    Ok(CycleReport {
        index: plan.index,
        cutoff: plan.cutoff,
        cutoff_date: series.dates().get(plan.cutoff).copied(),
        train: plan.train.clone(),
        predict: plan.predict.clone(),
        training: training.report,
        prediction,
        weights_written,
    })
}

fn merge_buffers(
    weights: &mut WeightsTensor,
    buffers: &[AssetWeights],
    offset: usize,
    allowed: &Range<usize>,
) -> Result<usize, PipelineError> {
    let mut written = 0;
    for buffer in buffers {
        written += weights.merge(buffer, offset, allowed)?;
    }
    Ok(written)
}

fn log_cycle(cycle: &CycleReport) {
    let label = cycle
        .cutoff_date
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "full history".to_string());
    for (asset, reason) in cycle.training.failures() {
        warn!("Cycle {} ({}): training failed for {}: {}", cycle.index, label, asset, reason);
    }
    for (asset, reason) in cycle.prediction.failures() {
        warn!("Cycle {} ({}): prediction failed for {}: {}", cycle.index, label, asset, reason);
    }
    debug!(
        "Cycle {} ({}): {} trained, {} skipped, {} weights written",
        cycle.index,
        label,
        cycle.training.trained_count(),
        cycle.training.skipped_count(),
        cycle.weights_written
    );
}

fn cycle_progress(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(err) => warn!("Invalid progress template: {}", err),
    }
    pb
}

/// Fits every asset on the whole series and predicts the same rows. The result
/// is forward-looking and only useful as a contrast to walk-forward output.
pub fn run_global_diagnostic(
    series: &PriceSeries,
    trainer: &TrainerConfig,
    predictor: &PredictorConfig,
    factory: &dyn ModelFactory,
    cancel: &CancellationFlag,
) -> Result<WalkForwardResult, PipelineError> {
    warn!("Global training fits on the rows it predicts; results are forward-looking");
    let len = series.len();
    let mut weights = WeightsTensor::new(series.dates().to_vec(), series.asset_names());
    let mut report = WalkForwardReport::new(series, RunMode::Backtest, true);

    let training = train_models(series, trainer, factory, cancel)?;
    let run = predict_weights(&training.models, series, 0..len, predictor, cancel)?;
    let weights_written = merge_buffers(&mut weights, &run.buffers, 0, &(0..len))?;

    let cycle = CycleReport {
        index: 0,
        cutoff: len,
        cutoff_date: None,
        train: 0..len,
        predict: 0..len,
        training: training.report,
        prediction: run.report,
        weights_written,
    };
    log_cycle(&cycle);
    report.cycles.push(cycle);

    Ok(WalkForwardResult { weights, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn dates(count: usize) -> Vec<DateTime<Utc>> {
        let start = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| start + Duration::days(i as i64))
            .collect()
    }

    fn config(train_period: usize, retrain_interval: usize) -> WalkForwardConfig {
        WalkForwardConfig {
            train_period,
            retrain_interval,
            ..WalkForwardConfig::default()
        }
    }

    #[test]
    fn cycles_cover_the_tail_exactly_once() {
        let axis = dates(100);
        let plans = plan_cycles(&axis, &config(30, 25));

        let cutoffs: Vec<usize> = plans.iter().map(|plan| plan.cutoff).collect();
        assert_eq!(cutoffs, vec![30, 55, 80]);
        assert_eq!(plans[2].predict, 80..100);

        let covered: Vec<usize> = plans.iter().flat_map(|plan| plan.predict.clone()).collect();
        assert_eq!(covered, (30..100).collect::<Vec<_>>());
    }

    #[test]
    fn training_window_ends_at_the_cutoff() {
        let axis = dates(200);
        let plans = plan_cycles(&axis, &config(50, 40));

        for pair in plans.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            assert_eq!(current.train.end, current.cutoff);
            assert!(current.predict.end <= next.cutoff);
            assert!(next.train.end - 1 >= current.cutoff);
        }
        assert_eq!(plans[0].train, 0..50);
        assert_eq!(plans[1].train, 40..90);
    }

    #[test]
    fn start_date_sets_first_cutoff() {
        let axis = dates(60);
        let plan_config = WalkForwardConfig {
            start_date: Some(axis[45]),
            ..config(20, 100)
        };
        let plans = plan_cycles(&axis, &plan_config);

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].cutoff, 45);
        assert_eq!(plans[0].train, 25..45);
        assert_eq!(plans[0].predict, 45..60);
    }

    #[test]
    fn start_date_before_history_still_leaves_one_training_row() {
        let axis = dates(10);
        let plan_config = WalkForwardConfig {
            start_date: Some(axis[0] - Duration::days(30)),
            ..config(5, 4)
        };
        let plans = plan_cycles(&axis, &plan_config);
        assert_eq!(plans[0].cutoff, 1);
        assert_eq!(plans[0].train, 0..1);
    }

    #[test]
    fn submission_mode_retrains_every_step() {
        let axis = dates(40);
        let plan_config = WalkForwardConfig {
            mode: RunMode::Submission,
            ..config(30, 500)
        };
        let plans = plan_cycles(&axis, &plan_config);

        assert_eq!(plans.len(), 10);
        assert!(plans.iter().all(|plan| plan.predict.len() == 1));
    }

    #[test]
    fn no_cycles_when_history_is_shorter_than_training() {
        assert!(plan_cycles(&dates(20), &config(30, 5)).is_empty());
    }

    #[test]
    fn zero_periods_are_rejected() {
        let invalid = WalkForwardConfig {
            lookback_period: 0,
            ..WalkForwardConfig::default()
        };
        assert!(matches!(
            invalid.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
