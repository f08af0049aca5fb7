use crate::error::PipelineError;
use crate::predictor::AssetWeights;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::Path;

/// Portfolio weights indexed by (date, asset). Every cell starts at `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightsTensor {
    dates: Vec<DateTime<Utc>>,
    assets: Vec<String>,
    asset_index: HashMap<String, usize>,
    values: Vec<Vec<f64>>,
}

#[derive(Serialize, Deserialize)]
struct WeightsFile {
    dates: Vec<DateTime<Utc>>,
    assets: Vec<String>,
    weights: Vec<Vec<f64>>,
}

impl WeightsTensor {
    pub fn new(dates: Vec<DateTime<Utc>>, assets: Vec<String>) -> Self {
        let asset_index = assets
            .iter()
            .enumerate()
            .map(|(index, asset)| (asset.clone(), index))
            .collect();
        let values = vec![vec![0.0; assets.len()]; dates.len()];
        Self {
            dates,
            assets,
            asset_index,
            values,
        }
    }

    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn get(&self, row: usize, asset: &str) -> Option<f64> {
        let column = *self.asset_index.get(asset)?;
        self.values.get(row).map(|values| values[column])
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        self.values.get(row).map(|values| values.as_slice())
    }

    /// Copies one asset's buffer into the tensor. Buffer rows are relative to
    /// `offset`; every resulting row must fall inside `allowed`. Returns the
    /// number of cells written.
    pub fn merge(
        &mut self,
        buffer: &AssetWeights,
        offset: usize,
        allowed: &Range<usize>,
    ) -> Result<usize, PipelineError> {
        let column = *self
            .asset_index
            .get(&buffer.asset)
            .ok_or_else(|| PipelineError::UnknownAsset(buffer.asset.clone()))?;

        // Validate before writing so a bad buffer leaves the tensor untouched.
        let rows = self.dates.len();
        if let Some((local, _)) = buffer.scores.iter().find(|(local, _)| {
            let row = offset + local;
            !allowed.contains(&row) || row >= rows
        }) {
            return Err(PipelineError::BufferOutOfRange {
                asset: buffer.asset.clone(),
                row: offset + local,
                start: allowed.start,
                end: allowed.end,
            });
        }

        for (local, score) in &buffer.scores {
            self.values[offset + local][column] = *score;
        }
        Ok(buffer.scores.len())
    }

    pub fn has_non_finite(&self) -> bool {
        self.values.iter().flatten().any(|value| !value.is_finite())
    }

    pub fn non_zero_count(&self) -> usize {
        self.values.iter().flatten().filter(|value| **value != 0.0).count()
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create weights directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create weights file at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let payload = WeightsFile {
            dates: self.dates.clone(),
            assets: self.assets.clone(),
            weights: self.values.clone(),
        };
        serde_json::to_writer(&mut writer, &payload).context("Failed to serialize weights")?;
        writer
            .flush()
            .context("Failed to flush weights file to disk")?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open weights file at {}", path.display()))?;
        let payload: WeightsFile = serde_json::from_reader(BufReader::new(file))
            .context("Weights decode failed")?;

        let mut tensor = Self::new(payload.dates, payload.assets);
        if payload.weights.len() != tensor.dates.len()
            || payload
                .weights
                .iter()
                .any(|row| row.len() != tensor.assets.len())
        {
            bail!(
                "Weights file {} does not match its {} dates x {} assets header",
                path.display(),
                tensor.dates.len(),
                tensor.assets.len()
            );
        }
        tensor.values = payload.weights;
        Ok(tensor)
    }
}
