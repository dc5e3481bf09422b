//! The batch job: load, fetch, merge, train, forecast, save.
//!
//! Each stage runs once, in order, inside a tracing span named after it;
//! a failure is wrapped as `stage '<name>' failed` and aborts the run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, info_span, warn};

use crate::config::PipelineConfig;
use crate::error::{DataError, FetchError};
use crate::forecast::{iterative_forecast, ForecastFrame};
use crate::metrics::RegressionMetrics;
use crate::models::regressor::SequenceRegressor;
use crate::output::save_forecast_csv;
use crate::persistence::{BestCheckpoint, ModelPersistence, SavedModel};
use crate::scaler::MinMaxScaler;
use crate::series::{merge_and_clean, TimeSeries};
use crate::sources::meteomatics::{HistoricalRequest, MeteomaticsClient};
use crate::sources::gridded::load_temperature_series;
use crate::training::create_adam_trainer;
use crate::windowing::make_supervised;

/// Extra periods beyond lookback + horizon below which the forecast is
/// considered unreliable
const HISTORY_MARGIN: usize = 10;

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub history_start: NaiveDateTime,
    pub history_end: NaiveDateTime,
    pub history_points: usize,
    pub training_pairs: usize,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub validation: Option<RegressionMetrics>,
    pub forecast: ForecastFrame,
    pub model_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub results_path: PathBuf,
}

fn stage<T, E>(name: &'static str, run: impl FnOnce() -> std::result::Result<T, E>) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    let _span = info_span!("stage", stage = name).entered();
    let result: Result<T> = run().map_err(Into::into);
    result.with_context(|| format!("stage '{}' failed", name))
}

/// Runs the job against the live Meteomatics API
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    run_with_fetcher(config, |request| {
        MeteomaticsClient::from_config(config)?.fetch_historical(request)
    })
}

/// Runs the job with `fetch` standing in for the remote history download
pub fn run_with_fetcher<F>(config: &PipelineConfig, fetch: F) -> Result<RunSummary>
where
    F: FnOnce(&HistoricalRequest) -> std::result::Result<TimeSeries, FetchError>,
{
    let freq = config.frequency;

    stage("setup", || -> std::io::Result<()> {
        std::fs::create_dir_all(&config.model_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;
        info!(model_dir = %config.model_dir.display(), output_dir = %config.output_dir.display(), "directories ready");
        Ok(())
    })?;

    let file_series = stage("load", || {
        let series = load_temperature_series(&config.source_path, config.variable_name.as_deref(), freq)?;
        log_range("gridded file", &series);
        Ok::<_, anyhow::Error>(series)
    })?;

    let network_series = stage("fetch", || {
        let series = fetch(&HistoricalRequest::from_config(config))?;
        log_range("Meteomatics", &series);
        Ok::<_, anyhow::Error>(series)
    })?;

    let merged = stage("merge", || {
        let merged = merge_and_clean(&file_series, &network_series, freq)?;
        info!(points = merged.len(), "series merged");
        Ok::<_, DataError>(merged)
    })?;
    let values = merged.values();

    let (scaler, scaled) = stage("scale", || {
        let scaler = MinMaxScaler::fit(&values)?;
        let scaled = scaler.transform_all(&values);
        info!(data_min = scaler.data_min, data_max = scaler.data_max, "scaler fitted");
        Ok::<_, DataError>((scaler, scaled))
    })?;

    let supervised = stage("window", || {
        if scaled.len() <= config.lookback + config.horizon + HISTORY_MARGIN {
            warn!(
                points = scaled.len(),
                lookback = config.lookback,
                horizon = config.horizon,
                "very little history for a robust forecast, continuing anyway"
            );
        }
        let set = make_supervised(&scaled, config.lookback)?;
        info!(pairs = set.len(), lookback = set.lookback(), "supervised windows built");
        Ok::<_, DataError>(set)
    })?;

    let model = stage("build", || {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = SequenceRegressor::with_rng(config.hidden_size, config.num_layers, config.dense_size, &mut rng);
        info!(
            hidden_size = config.hidden_size,
            num_layers = config.num_layers,
            dense_size = config.dense_size,
            parameters = model.num_parameters(),
            "model built"
        );
        Ok::<_, anyhow::Error>(model)
    })?;

    let checkpoint_path = config.checkpoint_path();
    let (model, epochs_run, best_epoch, final_loss, validation) = stage("train", || {
        let mut checkpoint = BestCheckpoint::new(&checkpoint_path, &scaler, config.lookback, config.model_name.clone());
        let mut trainer = create_adam_trainer(model, config.learning_rate).with_config(config.training_config());
        trainer.train(&supervised, &mut checkpoint)?;

        let (_, holdout) = supervised.split_validation(config.validation_split);
        let validation = if holdout.is_empty() {
            None
        } else {
            let predicted = scaler.inverse_transform_all(&trainer.predict(holdout.inputs.view()).to_vec());
            let actual = scaler.inverse_transform_all(&holdout.targets.to_vec());
            RegressionMetrics::compute(&actual, &predicted)
        };
        if let Some(m) = &validation {
            info!(mse = m.mse, rmse = m.rmse, mae = m.mae, r2 = m.r2, "validation metrics (physical units)");
        }

        let epochs_run = trainer.get_metrics_history().len();
        let best_epoch = trainer.best_epoch();
        let final_loss = trainer.model_loss();
        info!(epochs_run, best_epoch = ?best_epoch, checkpoints = checkpoint.saves(), "training finished");
        Ok::<_, anyhow::Error>((trainer.into_model(), epochs_run, best_epoch, final_loss, validation))
    })?;

    let forecast = stage("forecast", || {
        let lookback = config.lookback;
        if scaled.len() < lookback {
            return Err(DataError::InsufficientHistory {
                needed: lookback,
                available: scaled.len(),
            });
        }
        let window = &scaled[scaled.len() - lookback..];
        let predictions = iterative_forecast(&model, &scaler, window, config.horizon);
        let frame = ForecastFrame::starting_today(freq, &predictions);
        info!(steps = frame.len(), "forecast generated");
        Ok(frame)
    })?;

    let model_path = config.model_path();
    let results_path = config.results_path();
    stage("save", || {
        let saved = ModelPersistence::create_saved_model(
            &model,
            &scaler,
            config.lookback,
            config.model_name.clone(),
            epochs_run,
            final_loss,
            Some(format!("{} LSTM temperature forecaster", freq)),
        );
        save_artifacts(&saved, &forecast, &model_path, &results_path)
    })?;

    let summary = stage("summary", || {
        let (history_start, history_end) = merged
            .first_timestamp()
            .zip(merged.last_timestamp())
            .ok_or(DataError::EmptySeries)?;

        info!(
            start = %history_start.date(),
            end = %history_end.date(),
            frequency = %freq,
            points = merged.len(),
            "merged history"
        );
        info!(lookback = config.lookback, horizon = config.horizon, "window");
        info!(path = %model_path.display(), "model saved");
        info!(path = %results_path.display(), "forecast saved");
        for (ts, value) in forecast.points.iter().take(5) {
            info!(date = %ts.format(freq.date_format()), forecast_temperature = value, "forecast");
        }

        Ok::<_, DataError>(RunSummary {
            history_start,
            history_end,
            history_points: merged.len(),
            training_pairs: supervised.len(),
            epochs_run,
            best_epoch,
            validation,
            forecast: forecast.clone(),
            model_path: model_path.clone(),
            checkpoint_path: checkpoint_path.clone(),
            results_path: results_path.clone(),
        })
    })?;

    Ok(summary)
}

/// Sibling path an artifact is written to before being moved into place.
/// The extension is kept since it selects the model format.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".partial-{}", name))
}

/// Writes the model and the forecast table so that both land or neither does
fn save_artifacts(saved: &SavedModel, forecast: &ForecastFrame, model_path: &Path, results_path: &Path) -> Result<()> {
    let staged_model = staging_path(model_path);
    let staged_results = staging_path(results_path);

    let written = (|| -> Result<()> {
        ModelPersistence::save(saved, &staged_model)?;
        save_forecast_csv(forecast, &staged_results)?;
        std::fs::rename(&staged_model, model_path)
            .with_context(|| format!("failed to move model into {}", model_path.display()))?;
        if let Err(err) = std::fs::rename(&staged_results, results_path) {
            let _ = std::fs::remove_file(model_path);
            return Err(err).with_context(|| format!("failed to move forecast into {}", results_path.display()));
        }
        Ok(())
    })();

    if written.is_err() {
        let _ = std::fs::remove_file(&staged_model);
        let _ = std::fs::remove_file(&staged_results);
    }
    written
}

fn log_range(source: &str, series: &TimeSeries) {
    match (series.first_timestamp(), series.last_timestamp()) {
        (Some(first), Some(last)) => info!(source, points = series.len(), %first, %last, "series loaded"),
        _ => warn!(source, "series is empty"),
    }
}
