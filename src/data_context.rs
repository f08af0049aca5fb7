use crate::config::PipelineSettings;
use crate::models::PriceBar;
use crate::series::PriceSeries;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    assets: Vec<String>,
    unique_dates: Vec<DateTime<Utc>>,
    bars: Vec<PriceBar>,
    #[serde(default)]
    settings: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SnapshotFormat {
    Json,
    Bincode,
}

impl SnapshotFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Bincode,
        }
    }
}

fn scrub_snapshot_settings(settings: &HashMap<String, String>) -> HashMap<String, String> {
    settings
        .iter()
        .filter(|(key, _)| PipelineSettings::KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Historical bars for a universe of assets plus the settings they were
/// exported with.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    assets: Vec<String>,
    unique_dates: Vec<DateTime<Utc>>,
    bars: Vec<PriceBar>,
    settings: HashMap<String, String>,
}

impl MarketData {
    pub fn from_bars(mut bars: Vec<PriceBar>, settings: HashMap<String, String>) -> Self {
        bars.sort_by(|a, b| a.asset.cmp(&b.asset).then(a.date.cmp(&b.date)));
        let assets: BTreeSet<String> = bars.iter().map(|bar| bar.asset.clone()).collect();
        let unique_dates: BTreeSet<DateTime<Utc>> = bars.iter().map(|bar| bar.date).collect();
        Self {
            assets: assets.into_iter().collect(),
            unique_dates: unique_dates.into_iter().collect(),
            bars,
            settings,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot = match SnapshotFormat::for_path(path) {
            SnapshotFormat::Json => {
                serde_json::from_reader(reader).context("Snapshot decode failed")?
            }
            SnapshotFormat::Bincode => {
                bincode::deserialize_from(reader).context("Snapshot decode failed")?
            }
        };

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded {} bars for {} assets over {} dates (snapshot generated {})",
            snapshot.bars.len(),
            snapshot.assets.len(),
            snapshot.unique_dates.len(),
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S")
        );

        Ok(Self {
            assets: snapshot.assets,
            unique_dates: snapshot.unique_dates,
            bars: snapshot.bars,
            settings: snapshot.settings,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            assets: self.assets.clone(),
            unique_dates: self.unique_dates.clone(),
            bars: self.bars.clone(),
            settings: scrub_snapshot_settings(&self.settings),
        };
        match SnapshotFormat::for_path(path) {
            SnapshotFormat::Json => serde_json::to_writer(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
            SnapshotFormat::Bincode => bincode::serialize_into(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
        }
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn unique_dates(&self) -> &[DateTime<Utc>] {
        &self.unique_dates
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        PipelineSettings::from_settings_map(&self.settings)
            .context("Invalid pipeline settings in market data snapshot")
    }

    pub fn to_price_series(&self) -> Result<PriceSeries> {
        PriceSeries::from_bars(&self.bars).context("Market data snapshot has no usable bars")
    }
}
