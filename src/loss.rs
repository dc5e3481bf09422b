//! Training objectives for the regressor's `(batch, 1)` output column.

use ndarray::{Array2, Zip};

/// Objective minimised by the trainer
pub trait LossFunction {
    /// Mean loss over every element of the batch
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64;

    /// `d loss / d predictions`, same shape as `predictions`
    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64>;

    /// Loss and gradient in one call, as used by a training step
    fn loss_and_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> (f64, Array2<f64>) {
        (
            self.compute_loss(predictions, targets),
            self.compute_gradient(predictions, targets),
        )
    }
}

/// Squared error averaged over the batch, on scaled temperatures
#[derive(Debug, Clone, Copy, Default)]
pub struct MSELoss;

impl LossFunction for MSELoss {
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        let sum = Zip::from(predictions)
            .and(targets)
            .fold(0.0, |acc, &p, &t| acc + (p - t) * (p - t));
        sum / predictions.len() as f64
    }

    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
        let n = predictions.len().max(1) as f64;
        Zip::from(predictions)
            .and(targets)
            .map_collect(|&p, &t| 2.0 * (p - t) / n)
    }
}
