use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub asset: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

pub const FEATURE_COUNT: usize = 7;

/// Named channels of the feature tensor, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureChannel {
    Trend,
    MacdSignal,
    Volatility,
    StochasticD,
    Rsi,
    Price,
    Momentum,
}

impl FeatureChannel {
    pub const ALL: [FeatureChannel; FEATURE_COUNT] = [
        FeatureChannel::Trend,
        FeatureChannel::MacdSignal,
        FeatureChannel::Volatility,
        FeatureChannel::StochasticD,
        FeatureChannel::Rsi,
        FeatureChannel::Price,
        FeatureChannel::Momentum,
    ];

    pub fn index(&self) -> usize {
        match self {
            FeatureChannel::Trend => 0,
            FeatureChannel::MacdSignal => 1,
            FeatureChannel::Volatility => 2,
            FeatureChannel::StochasticD => 3,
            FeatureChannel::Rsi => 4,
            FeatureChannel::Price => 5,
            FeatureChannel::Momentum => 6,
        }
    }
}

pub type FeatureRow = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Backtest,
    Submission,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Backtest => "backtest",
            RunMode::Submission => "submission",
        }
    }
}
