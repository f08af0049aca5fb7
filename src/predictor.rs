use crate::cancellation::CancellationFlag;
use crate::error::PipelineError;
use crate::features::{extract_features, FeatureConfig};
use crate::models::FeatureRow;
use crate::series::PriceSeries;
use crate::trainer::ModelStore;
use rayon::prelude::*;
use serde::Serialize;
use std::ops::Range;

pub const DEFAULT_MIN_PREDICTION_ROWS: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictorConfig {
    pub min_rows: usize,
    pub features: FeatureConfig,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            min_rows: DEFAULT_MIN_PREDICTION_ROWS,
            features: FeatureConfig::default(),
        }
    }
}

/// One asset's predicted scores, keyed by row index of the prediction window.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetWeights {
    pub asset: String,
    pub scores: Vec<(usize, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictOutcome {
    Predicted { rows: usize },
    SkippedNoValidRows { rows: usize, required: usize },
    Failed { reason: String, written: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetPredictOutcome {
    pub asset: String,
    #[serde(flatten)]
    pub outcome: PredictOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionReport {
    pub outcomes: Vec<AssetPredictOutcome>,
}

impl PredictionReport {
    pub fn predicted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| matches!(entry.outcome, PredictOutcome::Predicted { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| matches!(entry.outcome, PredictOutcome::Failed { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|entry| match &entry.outcome {
            PredictOutcome::Failed { reason, .. } => Some((entry.asset.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn outcome_for(&self, asset: &str) -> Option<&PredictOutcome> {
        self.outcomes
            .iter()
            .find(|entry| entry.asset == asset)
            .map(|entry| &entry.outcome)
    }

    /// Folds another report in, combining outcomes of the same asset.
    pub fn absorb(&mut self, other: PredictionReport) {
        for entry in other.outcomes {
            match self
                .outcomes
                .iter_mut()
                .find(|existing| existing.asset == entry.asset)
            {
                Some(existing) => {
                    existing.outcome = combine(existing.outcome.clone(), entry.outcome)
                }
                None => self.outcomes.push(entry),
            }
        }
        self.outcomes.sort_by(|a, b| a.asset.cmp(&b.asset));
    }
}

fn combine(existing: PredictOutcome, incoming: PredictOutcome) -> PredictOutcome {
    use PredictOutcome::{Failed, Predicted, SkippedNoValidRows};

    match (existing, incoming) {
        (Failed { reason, written }, other) | (other, Failed { reason, written }) => Failed {
            reason,
            written: written + written_rows(&other),
        },
        (Predicted { rows: a }, Predicted { rows: b }) => Predicted { rows: a + b },
        (Predicted { rows }, SkippedNoValidRows { .. })
        | (SkippedNoValidRows { .. }, Predicted { rows }) => Predicted { rows },
        (SkippedNoValidRows { rows: a, required }, SkippedNoValidRows { rows: b, .. }) => {
            SkippedNoValidRows {
                rows: a + b,
                required,
            }
        }
    }
}

fn written_rows(outcome: &PredictOutcome) -> usize {
    match outcome {
        PredictOutcome::Predicted { rows } => *rows,
        PredictOutcome::Failed { written, .. } => *written,
        PredictOutcome::SkippedNoValidRows { .. } => 0,
    }
}

pub struct PredictionRun {
    pub buffers: Vec<AssetWeights>,
    pub report: PredictionReport,
}

/// Scores every asset that has a model. `min_rows` applies to the complete
/// feature rows of the whole window; only rows inside `output_rows` are
/// scored and written. Each asset writes only to its own buffer.
pub fn predict_weights(
    models: &ModelStore,
    window: &PriceSeries,
    output_rows: Range<usize>,
    config: &PredictorConfig,
    cancel: &CancellationFlag,
) -> Result<PredictionRun, PipelineError> {
    cancel.check()?;
    let assets: Vec<&String> = models.assets().collect();

    let results: Vec<(AssetPredictOutcome, Option<AssetWeights>)> = assets
        .par_iter()
        .map(|asset| {
            cancel.check()?;
            let (outcome, buffer) = predict_asset(asset, models, window, &output_rows, config);
            Ok((
                AssetPredictOutcome {
                    asset: (*asset).clone(),
                    outcome,
                },
                buffer,
            ))
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    cancel.check()?;

    let mut buffers = Vec::new();
    let mut report = PredictionReport::default();
    for (entry, buffer) in results {
        if let Some(buffer) = buffer {
            buffers.push(buffer);
        }
        report.outcomes.push(entry);
    }

    Ok(PredictionRun { buffers, report })
}

fn predict_asset(
    asset: &str,
    models: &ModelStore,
    window: &PriceSeries,
    output_rows: &Range<usize>,
    config: &PredictorConfig,
) -> (PredictOutcome, Option<AssetWeights>) {
    let (Some(model), Some(series)) = (models.get(asset), window.asset(asset)) else {
        return (
            PredictOutcome::SkippedNoValidRows {
                rows: 0,
                required: config.min_rows,
            },
            None,
        );
    };

    let frame = extract_features(series, &config.features);
    let complete = frame.complete_rows();
    if complete.is_empty() || complete.len() < config.min_rows {
        return (
            PredictOutcome::SkippedNoValidRows {
                rows: complete.len(),
                required: config.min_rows,
            },
            None,
        );
    }
    let rows: Vec<(usize, FeatureRow)> = complete
        .into_iter()
        .filter(|(index, _)| output_rows.contains(index))
        .collect();
    if rows.is_empty() {
        return (
            PredictOutcome::SkippedNoValidRows {
                rows: 0,
                required: config.min_rows,
            },
            None,
        );
    }

    let inputs: Vec<FeatureRow> = rows.iter().map(|(_, row)| *row).collect();
    let scores = match model.predict(&inputs) {
        Ok(scores) => scores,
        Err(err) => {
            return (
                PredictOutcome::Failed {
                    reason: err.to_string(),
                    written: 0,
                },
                None,
            )
        }
    };
    if scores.len() != rows.len() {
        return (
            PredictOutcome::Failed {
                reason: format!("model returned {} scores for {} rows", scores.len(), rows.len()),
                written: 0,
            },
            None,
        );
    }
    if let Some(position) = scores.iter().position(|score| !score.is_finite()) {
        return (
            PredictOutcome::Failed {
                reason: format!("non-finite score at window row {}", rows[position].0),
                written: 0,
            },
            None,
        );
    }

    let scores: Vec<(usize, f64)> = rows
        .iter()
        .map(|(index, _)| *index)
        .zip(scores)
        .collect();
    (
        PredictOutcome::Predicted { rows: scores.len() },
        Some(AssetWeights {
            asset: asset.to_string(),
            scores,
        }),
    )
}
