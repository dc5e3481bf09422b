//! Min-max scaling to `[0, 1]`.
//!
//! The scaler is fit once on the full merged history and then reused for
//! training normalization, the forecast rollout, and the model checkpoint.

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Fitted min-max transform `x' = (x - min) * scale`, `scale = 1 / (max - min)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: f64,
    pub data_max: f64,
    scale: f64,
}

impl MinMaxScaler {
    /// Fit bounds on `values`.
    ///
    /// A constant series gets a unit scale, so it maps to 0 instead of
    /// dividing by zero.
    pub fn fit(values: &[f64]) -> Result<Self, DataError> {
        if values.is_empty() {
            return Err(DataError::EmptySeries);
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFinite);
        }

        let data_min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let data_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = data_max - data_min;
        let scale = if range > 0.0 { 1.0 / range } else { 1.0 };

        Ok(Self {
            data_min,
            data_max,
            scale,
        })
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.data_min) * self.scale
    }

    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled / self.scale + self.data_min
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform(v)).collect()
    }

    pub fn inverse_transform_all(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&v| self.inverse_transform(v)).collect()
    }
}
