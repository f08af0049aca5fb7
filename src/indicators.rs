//! Causal series transforms used by the feature extractor.
//!
//! Every function returns a vector aligned with its input. Positions that are
//! still inside the warm-up window, or whose window touches a missing (`NaN`)
//! input, are `NaN`.

fn window_is_finite(window: &[f64]) -> bool {
    window.iter().all(|value| value.is_finite())
}

pub fn calculate_sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut sma_values = vec![f64::NAN; values.len()];
    if period == 0 {
        return sma_values;
    }

    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window_is_finite(window) {
            sma_values[i] = window.iter().sum::<f64>() / period as f64;
        }
    }

    sma_values
}

/// Linear-weighted moving average; the newest value carries weight `period`.
pub fn calculate_lwma(values: &[f64], period: usize) -> Vec<f64> {
    let mut lwma_values = vec![f64::NAN; values.len()];
    if period == 0 {
        return lwma_values;
    }

    let weight_sum = (period * (period + 1)) as f64 / 2.0;
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if !window_is_finite(window) {
            continue;
        }
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(offset, value)| value * (offset + 1) as f64)
            .sum();
        lwma_values[i] = weighted / weight_sum;
    }

    lwma_values
}

/// Exponential moving average seeded with the mean of the first `period`
/// finite inputs. Missing inputs produce a missing output and leave the
/// smoothing state untouched.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut ema_values = vec![f64::NAN; values.len()];
    if period == 0 {
        return ema_values;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut seed_sum = 0.0;
    let mut seed_count = 0usize;
    let mut ema: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        match ema {
            Some(previous) => {
                let next = (value * multiplier) + (previous * (1.0 - multiplier));
                ema = Some(next);
                ema_values[i] = next;
            }
            None => {
                seed_sum += value;
                seed_count += 1;
                if seed_count == period {
                    let seed = seed_sum / period as f64;
                    ema = Some(seed);
                    ema_values[i] = seed;
                }
            }
        }
    }

    ema_values
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(macd, signal)| macd - signal)
        .collect();

    (macd_line, signal_line, histogram)
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI. The first value appears once `period` price changes have been
/// observed; missing prices are skipped and the change is taken against the
/// last observed price.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut rsi_values = vec![f64::NAN; prices.len()];
    if period == 0 {
        return rsi_values;
    }

    let mut previous: Option<f64> = None;
    let mut delta_count = 0usize;
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    let mut avg_gain = 0.0f64;
    let mut avg_loss = 0.0f64;

    for (i, &price) in prices.iter().enumerate() {
        if !price.is_finite() {
            continue;
        }
        let Some(prev_price) = previous.replace(price) else {
            continue;
        };

        let delta = price - prev_price;
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        delta_count += 1;

        if delta_count < period {
            sum_gain += gain;
            sum_loss += loss;
            continue;
        }
        if delta_count == period {
            avg_gain = (sum_gain + gain) / period as f64;
            avg_loss = (sum_loss + loss) / period as f64;
        } else {
            avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        }
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

/// True range; the first bar has no previous close and uses `high - low`.
pub fn calculate_true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut tr_values = vec![f64::NAN; n];

    for i in 0..n {
        let (high, low) = (highs[i], lows[i]);
        if !high.is_finite() || !low.is_finite() {
            continue;
        }
        if i == 0 {
            tr_values[i] = high - low;
            continue;
        }
        let prev_close = closes[i - 1];
        if !prev_close.is_finite() {
            continue;
        }
        tr_values[i] = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
    }

    tr_values
}

/// Stochastic oscillator. Returns `(%K, %D)` where `%D` is the `smooth`-period
/// SMA of `%K`. A flat window reads as 50.
pub fn calculate_stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    smooth: usize,
) -> (Vec<f64>, Vec<f64>) {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut k_values = vec![f64::NAN; n];

    if period > 0 {
        for i in (period - 1)..n {
            let start = i + 1 - period;
            let high_window = &highs[start..=i];
            let low_window = &lows[start..=i];
            let close = closes[i];
            if !close.is_finite() || !window_is_finite(high_window) || !window_is_finite(low_window)
            {
                continue;
            }
            let highest = high_window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lowest = low_window.iter().copied().fold(f64::INFINITY, f64::min);
            let range = highest - lowest;
            k_values[i] = if range > 0.0 {
                100.0 * (close - lowest) / range
            } else {
                50.0
            };
        }
    }

    let d_values = calculate_sma(&k_values, smooth);
    (k_values, d_values)
}

/// Rate of change in percent: `100 * (x[t] / x[t - period] - 1)`.
pub fn calculate_roc(values: &[f64], period: usize) -> Vec<f64> {
    let mut roc_values = vec![f64::NAN; values.len()];

    for i in period..values.len() {
        let current = values[i];
        let base = values[i - period];
        if current.is_finite() && base.is_finite() && base != 0.0 {
            roc_values[i] = 100.0 * (current / base - 1.0);
        }
    }

    roc_values
}

/// Shifts a series by `periods` positions. Positive values lag the series,
/// negative values lead it; vacated positions are `NaN`.
pub fn shift(values: &[f64], periods: isize) -> Vec<f64> {
    let n = values.len();
    let mut shifted = vec![f64::NAN; n];
    let magnitude = periods.unsigned_abs();
    if magnitude >= n {
        return shifted;
    }

    if periods >= 0 {
        shifted[magnitude..].copy_from_slice(&values[..n - magnitude]);
    } else {
        shifted[..n - magnitude].copy_from_slice(&values[magnitude..]);
    }
    shifted
}

pub fn forward_fill(values: &[f64]) -> Vec<f64> {
    let mut last = f64::NAN;
    values
        .iter()
        .map(|&value| {
            if value.is_finite() {
                last = value;
            }
            last
        })
        .collect()
}

/// Fills every gap with the next observed value. Applied after
/// `forward_fill`, only the leading gap is left for it to touch.
pub fn back_fill(values: &[f64]) -> Vec<f64> {
    let mut filled = values.to_vec();
    let mut next = f64::NAN;
    for value in filled.iter_mut().rev() {
        if value.is_finite() {
            next = *value;
        } else {
            *value = next;
        }
    }
    filled
}

pub fn fill_missing(values: &[f64], fill_value: f64) -> Vec<f64> {
    values
        .iter()
        .map(|&value| if value.is_finite() { value } else { fill_value })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn lwma_weights_recent_values_heaviest() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let lwma = calculate_lwma(&values, 3);
        assert!(lwma[0].is_nan() && lwma[1].is_nan());
        // (1*1 + 2*2 + 3*3) / 6
        assert_close(lwma[2], 14.0 / 6.0);
        assert_close(lwma[3], 20.0 / 6.0);
    }

    #[test]
    fn sma_window_with_gap_is_missing() {
        let values = [1.0, f64::NAN, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&values, 2);
        assert!(sma[1].is_nan());
        assert!(sma[2].is_nan());
        assert_close(sma[3], 3.5);
        assert_close(sma[4], 4.5);
    }

    #[test]
    fn ema_seeds_with_simple_mean() {
        let values = [2.0, 4.0, 6.0, 8.0];
        let ema = calculate_ema(&values, 3);
        assert!(ema[0].is_nan() && ema[1].is_nan());
        assert_close(ema[2], 4.0);
        assert_close(ema[3], 8.0 * 0.5 + 4.0 * 0.5);
    }

    #[test]
    fn rsi_extremes_on_monotonic_series() {
        let rising: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let rsi = calculate_rsi(&rising, 14);
        assert!(rsi[13].is_nan());
        assert_close(rsi[14], 100.0);

        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        let rsi = calculate_rsi(&falling, 14);
        assert_close(rsi[19], 0.0);
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let highs = [10.0, 12.0];
        let lows = [9.0, 11.0];
        let closes = [9.5, 11.5];
        let tr = calculate_true_range(&highs, &lows, &closes);
        assert_close(tr[0], 1.0);
        assert_close(tr[1], 2.5);
    }

    #[test]
    fn stochastic_flat_window_reads_fifty() {
        let flat = [5.0; 6];
        let (k, d) = calculate_stochastic(&flat, &flat, &flat, 3, 2);
        assert!(k[1].is_nan());
        assert_close(k[2], 50.0);
        assert!(d[2].is_nan());
        assert_close(d[3], 50.0);
    }

    #[test]
    fn roc_and_shift_align_to_input() {
        let values = [100.0, 110.0, 121.0];
        let roc = calculate_roc(&values, 1);
        assert!(roc[0].is_nan());
        assert_close(roc[1], 10.0);
        assert_close(roc[2], 10.0);

        let lagged = shift(&values, 1);
        assert!(lagged[0].is_nan());
        assert_close(lagged[2], 110.0);
        let led = shift(&values, -1);
        assert_close(led[0], 110.0);
        assert!(led[2].is_nan());
    }

    #[test]
    fn fill_chain_covers_leading_and_inner_gaps() {
        let values = [f64::NAN, 2.0, f64::NAN, 4.0];
        let filled = back_fill(&forward_fill(&values));
        assert_eq!(filled, vec![2.0, 2.0, 2.0, 4.0]);
        assert_eq!(fill_missing(&[f64::NAN], 0.0), vec![0.0]);
    }
}
