use crate::cancellation::CancellationFlag;
use crate::error::PipelineError;
use crate::features::{extract_features, FeatureConfig};
use crate::labels::generate_labels;
use crate::models::FeatureRow;
use crate::regression::{ModelFactory, Regressor};
use crate::series::{AssetSeries, PriceSeries};
use chrono::{DateTime, Utc};
use log::debug;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_MIN_TRAINING_SAMPLES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainerConfig {
    pub min_samples: usize,
    pub features: FeatureConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_TRAINING_SAMPLES,
            features: FeatureConfig::default(),
        }
    }
}

/// Fitted models keyed by asset. Assets that were skipped or failed are absent.
#[derive(Default)]
pub struct ModelStore {
    models: BTreeMap<String, Box<dyn Regressor>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: String, model: Box<dyn Regressor>) {
        self.models.insert(asset, model);
    }

    pub fn get(&self, asset: &str) -> Option<&dyn Regressor> {
        self.models.get(asset).map(|model| model.as_ref())
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.models.contains_key(asset)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn assets(&self) -> impl Iterator<Item = &String> {
        self.models.keys()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainOutcome {
    Trained { samples: usize },
    SkippedInsufficientData { samples: usize, required: usize },
    Failed { samples: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetTrainOutcome {
    pub asset: String,
    #[serde(flatten)]
    pub outcome: TrainOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub outcomes: Vec<AssetTrainOutcome>,
}

impl TrainingReport {
    pub fn trained_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, TrainOutcome::Trained { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, TrainOutcome::SkippedInsufficientData { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, TrainOutcome::Failed { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|entry| match &entry.outcome {
            TrainOutcome::Failed { reason, .. } => Some((entry.asset.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn outcome_for(&self, asset: &str) -> Option<&TrainOutcome> {
        self.outcomes
            .iter()
            .find(|entry| entry.asset == asset)
            .map(|entry| &entry.outcome)
    }

    fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TrainOutcome) -> bool,
    {
        self.outcomes
            .iter()
            .filter(|entry| predicate(&entry.outcome))
            .count()
    }
}

pub struct TrainingRun {
    pub models: ModelStore,
    pub report: TrainingReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub date: DateTime<Utc>,
    pub features: FeatureRow,
    pub label: u8,
}

/// Complete feature rows inner-joined with defined labels on their timestamp.
pub fn build_training_samples(
    dates: &[DateTime<Utc>],
    series: &AssetSeries,
    config: &FeatureConfig,
) -> Vec<TrainingSample> {
    let frame = extract_features(series, config);
    let labels = generate_labels(&series.close);

    let feature_rows: BTreeMap<DateTime<Utc>, FeatureRow> = frame
        .complete_rows()
        .into_iter()
        .filter_map(|(index, row)| dates.get(index).map(|date| (*date, row)))
        .collect();
    let label_rows: BTreeMap<DateTime<Utc>, u8> = labels
        .iter()
        .enumerate()
        .filter_map(|(index, label)| Some((*dates.get(index)?, (*label)?)))
        .collect();

    feature_rows
        .into_iter()
        .filter_map(|(date, features)| {
            label_rows.get(&date).map(|&label| TrainingSample {
                date,
                features,
                label,
            })
        })
        .collect()
}

/// Fits one model per asset over the training window. Insufficient data and
/// fitting errors are per-asset outcomes; only cancellation aborts the batch.
pub fn train_models(
    window: &PriceSeries,
    config: &TrainerConfig,
    factory: &dyn ModelFactory,
    cancel: &CancellationFlag,
) -> Result<TrainingRun, PipelineError> {
    cancel.check()?;
    let assets: Vec<(&String, &AssetSeries)> = window.iter().collect();

    let results: Vec<(AssetTrainOutcome, Option<Box<dyn Regressor>>)> = assets
        .par_iter()
        .map(|(asset, series)| {
            cancel.check()?;
            let (outcome, model) = train_asset(asset, window.dates(), series, config, factory);
            Ok((
                AssetTrainOutcome {
                    asset: (*asset).clone(),
                    outcome,
                },
                model,
            ))
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    cancel.check()?;

    let mut models = ModelStore::new();
    let mut report = TrainingReport::default();
    for (entry, model) in results {
        if let Some(model) = model {
            models.insert(entry.asset.clone(), model);
        }
        report.outcomes.push(entry);
    }

    Ok(TrainingRun { models, report })
}

fn train_asset(
    asset: &str,
    dates: &[DateTime<Utc>],
    series: &AssetSeries,
    config: &TrainerConfig,
    factory: &dyn ModelFactory,
) -> (TrainOutcome, Option<Box<dyn Regressor>>) {
    let samples = build_training_samples(dates, series, &config.features);
    let sample_count = samples.len();
    if sample_count < config.min_samples {
        return (
            TrainOutcome::SkippedInsufficientData {
                samples: sample_count,
                required: config.min_samples,
            },
            None,
        );
    }

    let features: Vec<FeatureRow> = samples.iter().map(|sample| sample.features).collect();
    let targets: Vec<f64> = samples.iter().map(|sample| sample.label as f64).collect();

    match factory.fit(asset, &features, &targets) {
        Ok(model) => {
            debug!("Fitted {} on {} samples: {}", asset, sample_count, model.describe());
            (
                TrainOutcome::Trained {
                    samples: sample_count,
                },
                Some(model),
            )
        }
        Err(err) => (
            TrainOutcome::Failed {
                samples: sample_count,
                reason: err.to_string(),
            },
            None,
        ),
    }
}
