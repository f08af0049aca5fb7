use crate::models::{FeatureRow, FEATURE_COUNT};
use statrs::statistics::Statistics;
use thiserror::Error;

const MIN_FEATURE_SCALE: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("{features} feature rows but {targets} targets")]
    LengthMismatch { features: usize, targets: usize },
    #[error("non-finite value in {0}")]
    NonFiniteInput(&'static str),
    #[error("normal equations are singular (pivot {pivot} at column {column})")]
    SingularSystem { column: usize, pivot: f64 },
    #[error("ridge alpha must be finite and >= 0 (value: {0})")]
    InvalidAlpha(f64),
    #[error("{0}")]
    Other(String),
}

/// A fitted per-asset model.
pub trait Regressor: Send + Sync {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ModelError>;
    fn describe(&self) -> String;
}

/// Builds a fresh model for one asset at each retraining event.
pub trait ModelFactory: Send + Sync {
    fn fit(
        &self,
        asset: &str,
        features: &[FeatureRow],
        targets: &[f64],
    ) -> Result<Box<dyn Regressor>, ModelError>;
}

/// Ridge regression on standardized features, solved in closed form.
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeRegression {
    alpha: f64,
    means: [f64; FEATURE_COUNT],
    scales: [f64; FEATURE_COUNT],
    coefficients: [f64; FEATURE_COUNT],
    intercept: f64,
}

impl RidgeRegression {
    pub fn fit(features: &[FeatureRow], targets: &[f64], alpha: f64) -> Result<Self, ModelError> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(ModelError::InvalidAlpha(alpha));
        }
        if features.len() != targets.len() {
            return Err(ModelError::LengthMismatch {
                features: features.len(),
                targets: targets.len(),
            });
        }
        if features.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if features.iter().flatten().any(|value| !value.is_finite()) {
            return Err(ModelError::NonFiniteInput("features"));
        }
        if targets.iter().any(|value| !value.is_finite()) {
            return Err(ModelError::NonFiniteInput("targets"));
        }

        let mut means = [0.0; FEATURE_COUNT];
        let mut scales = [1.0; FEATURE_COUNT];
        for column in 0..FEATURE_COUNT {
            let values: Vec<f64> = features.iter().map(|row| row[column]).collect();
            means[column] = values.iter().mean();
            let std_dev = values.iter().std_dev();
            if std_dev.is_finite() && std_dev > MIN_FEATURE_SCALE {
                scales[column] = std_dev;
            }
        }
        let intercept = targets.iter().mean();

        let mut gram = [[0.0; FEATURE_COUNT]; FEATURE_COUNT];
        let mut moment = [0.0; FEATURE_COUNT];
        for (row, target) in features.iter().zip(targets.iter()) {
            let z = standardize(row, &means, &scales);
            let centered = target - intercept;
            for i in 0..FEATURE_COUNT {
                moment[i] += z[i] * centered;
                for j in 0..=i {
                    gram[i][j] += z[i] * z[j];
                }
            }
        }
        for i in 0..FEATURE_COUNT {
            for j in 0..i {
                gram[j][i] = gram[i][j];
            }
            gram[i][i] += alpha;
        }

        let coefficients = solve_cholesky(gram, moment)?;

        Ok(Self {
            alpha,
            means,
            scales,
            coefficients,
            intercept,
        })
    }

    pub fn predict_row(&self, row: &FeatureRow) -> f64 {
        let z = standardize(row, &self.means, &self.scales);
        self.intercept
            + z.iter()
                .zip(self.coefficients.iter())
                .map(|(value, weight)| value * weight)
                .sum::<f64>()
    }
}

impl Regressor for RidgeRegression {
    fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ModelError> {
        if rows.iter().flatten().any(|value| !value.is_finite()) {
            return Err(ModelError::NonFiniteInput("prediction features"));
        }
        Ok(rows.iter().map(|row| self.predict_row(row)).collect())
    }

    fn describe(&self) -> String {
        format!(
            "ridge(alpha={}, intercept={:.6}, coefficients={:?})",
            self.alpha, self.intercept, self.coefficients
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RidgeFactory {
    pub alpha: f64,
}

impl Default for RidgeFactory {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl ModelFactory for RidgeFactory {
    fn fit(
        &self,
        _asset: &str,
        features: &[FeatureRow],
        targets: &[f64],
    ) -> Result<Box<dyn Regressor>, ModelError> {
        let model = RidgeRegression::fit(features, targets, self.alpha)?;
        Ok(Box::new(model))
    }
}

fn standardize(
    row: &FeatureRow,
    means: &[f64; FEATURE_COUNT],
    scales: &[f64; FEATURE_COUNT],
) -> [f64; FEATURE_COUNT] {
    let mut z = [0.0; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        z[i] = (row[i] - means[i]) / scales[i];
    }
    z
}

/// Solves `a * x = b` for a symmetric positive-definite `a`.
fn solve_cholesky(
    a: [[f64; FEATURE_COUNT]; FEATURE_COUNT],
    b: [f64; FEATURE_COUNT],
) -> Result<[f64; FEATURE_COUNT], ModelError> {
    let mut lower = [[0.0; FEATURE_COUNT]; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        for j in 0..=i {
            let partial: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            if i == j {
                let pivot = a[i][i] - partial;
                if !pivot.is_finite() || pivot <= f64::EPSILON {
                    return Err(ModelError::SingularSystem { column: i, pivot });
                }
                lower[i][j] = pivot.sqrt();
            } else {
                lower[i][j] = (a[i][j] - partial) / lower[j][j];
            }
        }
    }

    let mut y = [0.0; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        let partial: f64 = (0..i).map(|k| lower[i][k] * y[k]).sum();
        y[i] = (b[i] - partial) / lower[i][i];
    }

    let mut x = [0.0; FEATURE_COUNT];
    for i in (0..FEATURE_COUNT).rev() {
        let partial: f64 = ((i + 1)..FEATURE_COUNT).map(|k| lower[k][i] * x[k]).sum();
        x[i] = (y[i] - partial) / lower[i][i];
    }

    if x.iter().any(|value| !value.is_finite()) {
        return Err(ModelError::NonFiniteInput("solution"));
    }
    Ok(x)
}
