use crate::models::PriceBar;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parameters for a seeded random-walk universe.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub assets: usize,
    pub days: usize,
    pub seed: u64,
    pub start: DateTime<Utc>,
    pub start_price: f64,
    pub daily_volatility: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            assets: 5,
            days: 1000,
            seed: 42,
            start: Utc
                .with_ymd_and_hms(2015, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            start_price: 100.0,
            daily_volatility: 0.015,
        }
    }
}

pub fn asset_name(index: usize) -> String {
    format!("SYN{:03}", index)
}

/// Weekday dates starting at `start`.
pub fn trading_days(start: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let mut dates = Vec::with_capacity(count);
    let mut current = start;
    while dates.len() < count {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(current);
        }
        current += Duration::days(1);
    }
    dates
}

/// Generates daily OHLC bars for every asset. The same config always yields
/// the same bars.
pub fn generate_bars(config: &SyntheticConfig) -> Vec<PriceBar> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let dates = trading_days(config.start, config.days);
    let mut bars = Vec::with_capacity(config.assets * config.days);

    for asset_index in 0..config.assets {
        let asset = asset_name(asset_index);
        let drift = rng.gen_range(-0.0003..0.0006);
        let cycle_length = rng.gen_range(20.0..90.0);
        let mut close: f64 = config.start_price * rng.gen_range(0.5..2.0);

        for (day, date) in dates.iter().enumerate() {
            let shock = rng.gen_range(-1.0..1.0) * config.daily_volatility;
            let seasonal = (day as f64 / cycle_length).sin() * config.daily_volatility * 0.3;
            let open = close;
            close = (close * (1.0 + drift + shock + seasonal)).max(0.01);
            let range = close * config.daily_volatility * rng.gen_range(0.2..1.0);

            bars.push(PriceBar {
                asset: asset.clone(),
                date: *date,
                open,
                high: open.max(close) + range * 0.5,
                low: (open.min(close) - range * 0.5).max(0.005),
                close,
            });
        }
    }

    bars
}
