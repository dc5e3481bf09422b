//! # SkyCast LSTM
//!
//! Temperature forecasting for a fixed point. A local NetCDF history and
//! the Meteomatics historical API are merged into one series, an LSTM
//! regressor learns one-step-ahead prediction, and the trained model is
//! rolled forward on its own outputs to produce a multi-step forecast.
//!
//! ## Core Components
//!
//! - **Sources**: gridded NetCDF loader and Meteomatics client
//! - **Series**: resampling, priority merge and gap filling
//! - **Models**: LSTM cells and networks with BPTT, dense head
//! - **Training**: mini-batch Adam, validation split, early stopping,
//!   LR-on-plateau and best-epoch checkpoints
//! - **Forecast**: open-loop iterative rollout with inverse scaling
//!
//! ## Quick Start
//!
//! ```rust
//! use skycast_lstm::{iterative_forecast, MinMaxScaler, SequenceRegressor};
//!
//! let history = [18.0, 19.5, 21.0, 20.0, 19.0];
//! let scaler = MinMaxScaler::fit(&history).unwrap();
//! let window = scaler.transform_all(&history[2..]);
//!
//! let model = SequenceRegressor::new(8, 1, 4);
//! let forecast = iterative_forecast(&model, &scaler, &window, 7);
//! assert_eq!(forecast.len(), 7);
//! ```

pub mod config;
pub mod error;
pub mod forecast;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod models;
pub mod optimizers;
pub mod output;
pub mod persistence;
pub mod pipeline;
pub mod scaler;
pub mod schedulers;
pub mod series;
pub mod sources;
pub mod training;
pub mod utils;
pub mod windowing;

// Re-export commonly used items
pub use config::PipelineConfig;
pub use error::{ConfigError, DataError, FetchError, OutputError, PersistenceError, SourceError, TrainingError};
pub use forecast::{iterative_forecast, ForecastFrame, Predictor};
pub use layers::lstm_cell::LSTMCell;
pub use models::lstm_network::LSTMNetwork;
pub use models::regressor::SequenceRegressor;
pub use optimizers::Adam;
pub use loss::MSELoss;
pub use persistence::{ModelMetadata, ModelPersistence, SavedModel};
pub use scaler::MinMaxScaler;
pub use series::{merge_and_clean, Frequency, TimeSeries};
pub use training::{
    create_adam_trainer, EarlyStopper, EarlyStoppingConfig, EarlyStoppingMetric, RegressorTrainer, TrainingConfig,
    TrainingMetrics,
};
pub use windowing::{make_supervised, SupervisedSet};

/// Installs the `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` filter. Calling it twice is harmless.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_library_integration() {
        let network = LSTMNetwork::new(2, 3, 1);
        let input = arr2(&[[1.0], [0.5]]);
        let hx = vec![arr2(&[[0.0], [0.0], [0.0]])];
        let cx = vec![arr2(&[[0.0], [0.0], [0.0]])];

        let (hy, cy) = network.forward(&input, &hx, &cx);

        assert_eq!(hy[0].shape(), &[3, 1]);
        assert_eq!(cy[0].shape(), &[3, 1]);
    }
}
