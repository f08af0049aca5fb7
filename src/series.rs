use crate::error::PipelineError;
use crate::models::PriceBar;
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

/// One asset's OHLC columns aligned to the series date axis. Dates without a
/// bar hold `NaN` in every field.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetSeries {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
}

impl AssetSeries {
    fn with_len(len: usize) -> Self {
        Self {
            open: vec![f64::NAN; len],
            high: vec![f64::NAN; len],
            low: vec![f64::NAN; len],
            close: vec![f64::NAN; len],
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            open: self.open[range.clone()].to_vec(),
            high: self.high[range.clone()].to_vec(),
            low: self.low[range.clone()].to_vec(),
            close: self.close[range].to_vec(),
        }
    }

    /// Number of dates with an observed close.
    pub fn observed_count(&self) -> usize {
        self.close.iter().filter(|value| value.is_finite()).count()
    }
}

/// Price tensor indexed by (time, field, asset).
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    dates: Vec<DateTime<Utc>>,
    assets: BTreeMap<String, AssetSeries>,
}

impl PriceSeries {
    pub fn from_bars(bars: &[PriceBar]) -> Result<Self, PipelineError> {
        let unique_dates: BTreeSet<DateTime<Utc>> = bars.iter().map(|bar| bar.date).collect();
        let dates: Vec<DateTime<Utc>> = unique_dates.into_iter().collect();
        if dates.is_empty() {
            return Err(PipelineError::EmptySeries);
        }
        let date_index: HashMap<DateTime<Utc>, usize> = dates
            .iter()
            .enumerate()
            .map(|(index, date)| (*date, index))
            .collect();

        let mut assets: BTreeMap<String, AssetSeries> = BTreeMap::new();
        let mut duplicates = 0usize;
        for bar in bars {
            let Some(&row) = date_index.get(&bar.date) else {
                continue;
            };
            let series = assets
                .entry(bar.asset.clone())
                .or_insert_with(|| AssetSeries::with_len(dates.len()));
            if series.close[row].is_finite() {
                duplicates += 1;
            }
            series.open[row] = bar.open;
            series.high[row] = bar.high;
            series.low[row] = bar.low;
            series.close[row] = bar.close;
        }

        if duplicates > 0 {
            warn!(
                "{} duplicate (asset, date) bars found; the last occurrence was kept",
                duplicates
            );
        }

        Self::from_columns(dates, assets)
    }

    pub fn from_columns(
        dates: Vec<DateTime<Utc>>,
        assets: BTreeMap<String, AssetSeries>,
    ) -> Result<Self, PipelineError> {
        if dates.is_empty() || assets.is_empty() {
            return Err(PipelineError::EmptySeries);
        }
        if let Some((asset, series)) = assets.iter().find(|(_, s)| s.len() != dates.len()) {
            return Err(PipelineError::InvalidConfig(format!(
                "asset {} has {} rows but the date axis has {}",
                asset,
                series.len(),
                dates.len()
            )));
        }
        Ok(Self { dates, assets })
    }

    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn asset_names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    pub fn asset(&self, name: &str) -> Option<&AssetSeries> {
        self.assets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AssetSeries)> {
        self.assets.iter()
    }

    /// Copies the half-open row range of the time axis. The range is clamped
    /// to the series length.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.dates.len());
        let start = range.start.min(end);
        Self {
            dates: self.dates[start..end].to_vec(),
            assets: self
                .assets
                .iter()
                .map(|(name, series)| (name.clone(), series.slice(start..end)))
                .collect(),
        }
    }
}
