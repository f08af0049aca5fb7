use crate::indicators;

pub const LABEL_UP: u8 = 1;
pub const LABEL_DOWN: u8 = 0;

/// Next-day direction labels: `1` when `close[t + 1] > close[t]`, `0`
/// otherwise. The last row, and any row where either close is missing, has no
/// label.
pub fn generate_labels(close: &[f64]) -> Vec<Option<u8>> {
    let next_close = indicators::shift(close, -1);
    close
        .iter()
        .zip(next_close.iter())
        .map(|(current, next)| {
            if !current.is_finite() || !next.is_finite() {
                None
            } else if next > current {
                Some(LABEL_UP)
            } else {
                Some(LABEL_DOWN)
            }
        })
        .collect()
}
