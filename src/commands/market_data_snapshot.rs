use crate::data_context::MarketData;
use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use tokio::fs;

pub async fn ensure_market_data_file(path: &Path) -> Result<()> {
    if fs::metadata(path).await.is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Generate one with `synthesize` or export it from your data source first.",
        path.display()
    ))
}

/// Checks the snapshot exists, then decodes it off the async runtime.
pub async fn load_market_data(path: &Path) -> Result<MarketData> {
    ensure_market_data_file(path).await?;
    let path: PathBuf = path.to_path_buf();
    let market_data = tokio::task::spawn_blocking(move || MarketData::load_from_file(&path))
        .await
        .context("Market data loader task panicked")??;
    info!(
        "Loaded {} bars for {} assets across {} dates",
        market_data.bars().len(),
        market_data.assets().len(),
        market_data.unique_dates().len()
    );
    Ok(market_data)
}
