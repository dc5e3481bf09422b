//! `skycast`: runs the forecasting job once. Settings come from
//! `PipelineConfig::load`.

use std::process::ExitCode;

use skycast_lstm::{init_logging, pipeline, PipelineConfig};
use tracing::{error, info};

fn main() -> ExitCode {
    init_logging();
    info!("starting SkyCast LSTM");

    let result = PipelineConfig::load()
        .map_err(anyhow::Error::from)
        .and_then(|config| pipeline::run(&config));

    match result {
        Ok(summary) => {
            info!(
                points = summary.history_points,
                epochs = summary.epochs_run,
                forecast_steps = summary.forecast.len(),
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("run failed: {}", err);
            for cause in err.chain().skip(1) {
                error!("  caused by: {}", cause);
            }
            error!("{:?}", err);
            ExitCode::FAILURE
        }
    }
}
