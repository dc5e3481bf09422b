//! Regression scores in physical units.

use serde::Serialize;

/// Error statistics between observed and predicted values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Coefficient of determination; NaN when the observations are constant
    pub r2: f64,
}

impl RegressionMetrics {
    /// Returns `None` for empty or mismatched inputs.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return None;
        }

        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;

        let (mut sse, mut sae, mut sst) = (0.0, 0.0, 0.0);
        for (&a, &p) in actual.iter().zip(predicted) {
            let err = a - p;
            sse += err * err;
            sae += err.abs();
            sst += (a - mean) * (a - mean);
        }

        let mse = sse / n;
        let r2 = if sst > 0.0 { 1.0 - sse / sst } else { f64::NAN };
        Some(RegressionMetrics {
            mse,
            rmse: mse.sqrt(),
            mae: sae / n,
            r2,
        })
    }
}
