use crate::indicators;
use crate::models::{FeatureChannel, FeatureRow, FEATURE_COUNT};
use crate::series::AssetSeries;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureConfig {
    pub trend_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volatility_period: usize,
    pub stochastic_period: usize,
    pub stochastic_smooth: usize,
    pub rsi_period: usize,
    pub momentum_period: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            trend_period: 60,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volatility_period: 14,
            stochastic_period: 14,
            stochastic_smooth: 3,
            rsi_period: 14,
            momentum_period: 14,
        }
    }
}

impl FeatureConfig {
    /// Index of the first row that can be complete on gap-free input.
    pub fn warmup_period(&self) -> usize {
        let trend = self.trend_period.saturating_sub(1) + 1;
        let macd = self.macd_fast.max(self.macd_slow).saturating_sub(1)
            + self.macd_signal.saturating_sub(1);
        let volatility = self.volatility_period.saturating_sub(1);
        let stochastic =
            self.stochastic_period.saturating_sub(1) + self.stochastic_smooth.saturating_sub(1);
        let rsi = self.rsi_period;
        let momentum = self.momentum_period;

        [trend, macd, volatility, stochastic, rsi, momentum]
            .into_iter()
            .max()
            .unwrap_or(0)
    }
}

/// Per-asset feature tensor: one column per [`FeatureChannel`], aligned with
/// the input rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    channels: [Vec<f64>; FEATURE_COUNT],
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, channel: FeatureChannel) -> &[f64] {
        &self.channels[channel.index()]
    }

    /// The row at `index` when every channel is finite.
    pub fn row(&self, index: usize) -> Option<FeatureRow> {
        if index >= self.len() {
            return None;
        }
        let mut row = [0.0; FEATURE_COUNT];
        for (slot, column) in row.iter_mut().zip(self.channels.iter()) {
            let value = column[index];
            if !value.is_finite() {
                return None;
            }
            *slot = value;
        }
        Some(row)
    }

    pub fn complete_rows(&self) -> Vec<(usize, FeatureRow)> {
        (0..self.len())
            .filter_map(|index| self.row(index).map(|row| (index, row)))
            .collect()
    }
}

pub fn extract_features(series: &AssetSeries, config: &FeatureConfig) -> FeatureFrame {
    let close = &series.close;

    let trend = indicators::calculate_roc(
        &indicators::calculate_lwma(close, config.trend_period),
        1,
    );

    let (_, macd_signal, _) =
        indicators::calculate_macd(close, config.macd_fast, config.macd_slow, config.macd_signal);

    let true_range = indicators::calculate_true_range(&series.high, &series.low, close);
    let volatility: Vec<f64> = indicators::calculate_lwma(&true_range, config.volatility_period)
        .iter()
        .zip(close.iter())
        .map(|(tr, price)| {
            if *price > 0.0 {
                tr / price
            } else {
                f64::NAN
            }
        })
        .collect();

    let (_, stochastic_d) = indicators::calculate_stochastic(
        &series.high,
        &series.low,
        close,
        config.stochastic_period,
        config.stochastic_smooth,
    );

    let rsi = indicators::calculate_rsi(close, config.rsi_period);

    let filled_close = indicators::fill_missing(
        &indicators::back_fill(&indicators::forward_fill(close)),
        0.0,
    );
    let price: Vec<f64> = filled_close.iter().map(|value| value.ln()).collect();

    let momentum = indicators::calculate_roc(close, config.momentum_period);

    FeatureFrame {
        channels: [
            trend,
            macd_signal,
            volatility,
            stochastic_d,
            rsi,
            price,
            momentum,
        ],
    }
}
