//! Open-loop multi-step forecasting.
//!
//! A single-step predictor is rolled forward by feeding each prediction
//! back into its own input window. No observed data enters the window after
//! the first step, so errors compound over the horizon; there is no
//! correction step.

use std::collections::VecDeque;

use chrono::{Local, NaiveDateTime};
use ndarray::Array2;
use tracing::warn;

use crate::models::regressor::SequenceRegressor;
use crate::scaler::MinMaxScaler;
use crate::series::Frequency;

/// Anything that maps a window of scaled values to the next scaled value
pub trait Predictor {
    fn predict(&self, window: &[f64]) -> f64;
}

impl Predictor for SequenceRegressor {
    fn predict(&self, window: &[f64]) -> f64 {
        let batch = Array2::from_shape_fn((1, window.len()), |(_, j)| window[j]);
        self.predict_batch(batch.view())[0]
    }
}

/// Rolls `predictor` forward `horizon` steps from `initial_window`.
///
/// `initial_window` holds the L most recent observations already scaled with
/// `scaler`; the caller guarantees at least L observations exist. Each step
/// inverse-scales the raw prediction into physical units, records it, then
/// re-scales that physical value to advance the window, which keeps exactly
/// L elements throughout. Returns the predictions in physical units, in step
/// order; `horizon == 0` yields an empty vector.
///
/// Non-finite predictions are passed through unchanged (they poison every
/// later step); only the first one is logged.
pub fn iterative_forecast<P: Predictor + ?Sized>(
    predictor: &P,
    scaler: &MinMaxScaler,
    initial_window: &[f64],
    horizon: usize,
) -> Vec<f64> {
    let lookback = initial_window.len();
    let mut window: VecDeque<f64> = initial_window.iter().copied().collect();
    let mut predictions = Vec::with_capacity(horizon);
    let mut warned = false;

    for step in 0..horizon {
        let yhat_scaled = predictor.predict(window.make_contiguous());
        let yhat = scaler.inverse_transform(yhat_scaled);
        predictions.push(yhat);

        if !yhat.is_finite() && !warned {
            warn!(step, "non-finite forecast value, remaining steps will inherit it");
            warned = true;
        }

        let next_scaled = scaler.transform(yhat);
        window.pop_front();
        window.push_back(next_scaled);
        debug_assert_eq!(window.len(), lookback);
    }

    predictions
}

/// Forecast values with their period timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastFrame {
    pub frequency: Frequency,
    pub points: Vec<(NaiveDateTime, f64)>,
}

impl ForecastFrame {
    /// Indexes `predictions` by consecutive periods starting at `start`.
    pub fn new(start: NaiveDateTime, frequency: Frequency, predictions: &[f64]) -> Self {
        let mut ts = frequency.bucket(start);
        let mut points = Vec::with_capacity(predictions.len());
        for &value in predictions {
            points.push((ts, value));
            ts += frequency.step();
        }
        Self { frequency, points }
    }

    /// Frame starting at the current local day's midnight, not at the end of
    /// the history.
    pub fn starting_today(frequency: Frequency, predictions: &[f64]) -> Self {
        let today = Local::now().date_naive();
        let start = today.and_hms_opt(0, 0, 0).unwrap_or_else(|| Local::now().naive_local());
        Self::new(start, frequency, predictions)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};

    /// Returns the last element of the window and records window lengths
    struct LastValue {
        seen_lengths: RefCell<Vec<usize>>,
    }

    impl Predictor for LastValue {
        fn predict(&self, window: &[f64]) -> f64 {
            self.seen_lengths.borrow_mut().push(window.len());
            *window.last().unwrap()
        }
    }

    /// Predicts the mean of the window
    struct WindowMean;

    impl Predictor for WindowMean {
        fn predict(&self, window: &[f64]) -> f64 {
            window.iter().sum::<f64>() / window.len() as f64
        }
    }

    fn scaler() -> MinMaxScaler {
        MinMaxScaler::fit(&[10.0, 30.0]).unwrap()
    }

    #[test]
    fn test_returns_exactly_horizon_values() {
        let window = [0.1, 0.5, 0.9];
        for horizon in [1, 2, 7, 50] {
            let preds = iterative_forecast(&WindowMean, &scaler(), &window, horizon);
            assert_eq!(preds.len(), horizon);
        }
    }

    #[test]
    fn test_zero_horizon_is_empty() {
        let preds = iterative_forecast(&WindowMean, &scaler(), &[0.2, 0.4], 0);
        assert!(preds.is_empty());
    }

    #[test]
    fn test_predictions_fed_back_into_window() {
        // Scaler maps [10, 30] onto [0, 1]; window mean of [0.0, 1.0] = 0.5 -> 20.0
        let preds = iterative_forecast(&WindowMean, &scaler(), &[0.0, 1.0], 3);

        assert!((preds[0] - 20.0).abs() < 1e-12);
        // Window is now [1.0, 0.5] -> 0.75 -> 25.0
        assert!((preds[1] - 25.0).abs() < 1e-12);
        // Window [0.5, 0.75] -> 0.625 -> 22.5
        assert!((preds[2] - 22.5).abs() < 1e-12);
    }

    #[test]
    fn test_window_length_is_constant() {
        let predictor = LastValue { seen_lengths: RefCell::new(Vec::new()) };
        let window = vec![0.3; 12];

        let preds = iterative_forecast(&predictor, &scaler(), &window, 25);

        let lengths = predictor.seen_lengths.borrow();
        assert_eq!(lengths.len(), 25);
        assert!(lengths.iter().all(|&l| l == 12));
        assert!(preds.iter().all(|&p| (p - 16.0).abs() < 1e-9));
    }

    #[test]
    fn test_deterministic() {
        let window = [0.1, 0.7, 0.4, 0.2];
        let a = iterative_forecast(&WindowMean, &scaler(), &window, 10);
        let b = iterative_forecast(&WindowMean, &scaler(), &window, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_nan_propagates_without_guard() {
        struct NanOnce {
            calls: Cell<usize>,
        }
        impl Predictor for NanOnce {
            fn predict(&self, window: &[f64]) -> f64 {
                let call = self.calls.get();
                self.calls.set(call + 1);
                if call == 0 { f64::NAN } else { WindowMean.predict(window) }
            }
        }

        let predictor = NanOnce { calls: Cell::new(0) };
        let preds = iterative_forecast(&predictor, &scaler(), &[0.1, 0.2], 4);
        assert_eq!(preds.len(), 4);
        assert!(preds.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn test_forecast_frame_consecutive_days() {
        let start = NaiveDate::from_ymd_opt(2025, 12, 30).unwrap().and_hms_opt(15, 30, 0).unwrap();
        let frame = ForecastFrame::new(start, Frequency::Daily, &[1.0, 2.0, 3.0]);

        let dates: Vec<String> = frame.points.iter().map(|(ts, _)| ts.format("%Y-%m-%d").to_string()).collect();
        assert_eq!(dates, vec!["2025-12-30", "2025-12-31", "2026-01-01"]);
        assert_eq!(frame.points[0].0.format("%H:%M").to_string(), "00:00");
    }

    #[test]
    fn test_frame_starting_today() {
        let frame = ForecastFrame::starting_today(Frequency::Daily, &[5.0]);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.points[0].0.date(), Local::now().date_naive());
    }
}
