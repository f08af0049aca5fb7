use crate::data_context::MarketData;
use crate::synthetic::{generate_bars, SyntheticConfig};
use anyhow::{anyhow, Result};
use log::info;
use std::collections::HashMap;
use std::path::Path;

pub async fn run(output_path: &Path, assets: usize, days: usize, seed: u64) -> Result<()> {
    if assets == 0 || days == 0 {
        return Err(anyhow!(
            "synthesize needs at least one asset and one day (assets: {}, days: {})",
            assets,
            days
        ));
    }
    info!(
        "Generating synthetic market data ({} assets x {} days, seed {}) at {}",
        assets,
        days,
        seed,
        output_path.display()
    );

    let config = SyntheticConfig {
        assets,
        days,
        seed,
        ..SyntheticConfig::default()
    };
    let market_data = MarketData::from_bars(generate_bars(&config), HashMap::new());
    market_data.save_to_file(output_path)?;

    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );
    Ok(())
}
