use crate::predictor::DEFAULT_MIN_PREDICTION_ROWS;
use crate::trainer::DEFAULT_MIN_TRAINING_SAMPLES;
use crate::walk_forward::{
    DEFAULT_LOOKBACK_PERIOD, DEFAULT_RETRAIN_INTERVAL, DEFAULT_RETRAIN_INTERVAL_AFTER_SUBMIT,
    DEFAULT_TRAIN_PERIOD,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;

pub const DEFAULT_RIDGE_ALPHA: f64 = 1.0;

/// Pipeline settings carried in a market data snapshot. Missing keys fall back
/// to defaults; malformed values are errors.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub train_period: usize,
    pub retrain_interval: usize,
    pub retrain_interval_after_submit: usize,
    pub predict_each_day: bool,
    pub lookback_period: usize,
    pub backtest_start_date: Option<NaiveDate>,
    pub min_training_samples: usize,
    pub min_prediction_rows: usize,
    pub ridge_alpha: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            train_period: DEFAULT_TRAIN_PERIOD,
            retrain_interval: DEFAULT_RETRAIN_INTERVAL,
            retrain_interval_after_submit: DEFAULT_RETRAIN_INTERVAL_AFTER_SUBMIT,
            predict_each_day: false,
            lookback_period: DEFAULT_LOOKBACK_PERIOD,
            backtest_start_date: None,
            min_training_samples: DEFAULT_MIN_TRAINING_SAMPLES,
            min_prediction_rows: DEFAULT_MIN_PREDICTION_ROWS,
            ridge_alpha: DEFAULT_RIDGE_ALPHA,
        }
    }
}

impl PipelineSettings {
    pub const KEYS: [&'static str; 9] = [
        "TRAIN_PERIOD",
        "RETRAIN_INTERVAL",
        "RETRAIN_INTERVAL_AFTER_SUBMIT",
        "PREDICT_EACH_DAY",
        "LOOKBACK_PERIOD",
        "BACKTEST_START_DATE",
        "MIN_TRAINING_SAMPLES",
        "MIN_PREDICTION_ROWS",
        "RIDGE_ALPHA",
    ];

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let train_period =
            optional_setting_usize(settings, "TRAIN_PERIOD", 1)?.unwrap_or(defaults.train_period);
        let retrain_interval = optional_setting_usize(settings, "RETRAIN_INTERVAL", 1)?
            .unwrap_or(defaults.retrain_interval);
        let retrain_interval_after_submit =
            optional_setting_usize(settings, "RETRAIN_INTERVAL_AFTER_SUBMIT", 1)?
                .unwrap_or(defaults.retrain_interval_after_submit);
        let predict_each_day = optional_setting_bool(settings, "PREDICT_EACH_DAY")?
            .unwrap_or(defaults.predict_each_day);
        let lookback_period = optional_setting_usize(settings, "LOOKBACK_PERIOD", 1)?
            .unwrap_or(defaults.lookback_period);
        let backtest_start_date = optional_setting_date(settings, "BACKTEST_START_DATE")?;
        let min_training_samples = optional_setting_usize(settings, "MIN_TRAINING_SAMPLES", 1)?
            .unwrap_or(defaults.min_training_samples);
        let min_prediction_rows = optional_setting_usize(settings, "MIN_PREDICTION_ROWS", 1)?
            .unwrap_or(defaults.min_prediction_rows);
        let ridge_alpha = optional_setting_f64(settings, "RIDGE_ALPHA", Some(0.0), None)?
            .unwrap_or(defaults.ridge_alpha);

        Ok(Self {
            train_period,
            retrain_interval,
            retrain_interval_after_submit,
            predict_each_day,
            lookback_period,
            backtest_start_date,
            min_training_samples,
            min_prediction_rows,
            ridge_alpha,
        })
    }

    /// Settings as snapshot key/value pairs. Unset dates are omitted.
    pub fn to_settings_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("TRAIN_PERIOD".to_string(), self.train_period.to_string());
        map.insert(
            "RETRAIN_INTERVAL".to_string(),
            self.retrain_interval.to_string(),
        );
        map.insert(
            "RETRAIN_INTERVAL_AFTER_SUBMIT".to_string(),
            self.retrain_interval_after_submit.to_string(),
        );
        map.insert(
            "PREDICT_EACH_DAY".to_string(),
            self.predict_each_day.to_string(),
        );
        map.insert(
            "LOOKBACK_PERIOD".to_string(),
            self.lookback_period.to_string(),
        );
        if let Some(date) = self.backtest_start_date {
            map.insert(
                "BACKTEST_START_DATE".to_string(),
                date.format("%Y-%m-%d").to_string(),
            );
        }
        map.insert(
            "MIN_TRAINING_SAMPLES".to_string(),
            self.min_training_samples.to_string(),
        );
        map.insert(
            "MIN_PREDICTION_ROWS".to_string(),
            self.min_prediction_rows.to_string(),
        );
        map.insert("RIDGE_ALPHA".to_string(), self.ridge_alpha.to_string());
        map
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn parse_date(key: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

/// Midnight UTC of `date`.
pub fn start_of_day_utc(date: NaiveDate) -> Result<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .ok_or_else(|| anyhow!("Date {} has no midnight", date))
}

fn optional_setting_date(
    settings: &HashMap<String, String>,
    key: &str,
) -> Result<Option<NaiveDate>> {
    optional_setting(settings, key)
        .map(|raw| parse_date(key, raw))
        .transpose()
}

fn optional_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(value) = optional_setting_f64(settings, key, None, None)? else {
        return Ok(None);
    };
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            value
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            value
        ));
    }
    Ok(Some(value as usize))
}
