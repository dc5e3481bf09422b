//! Forecast table writer.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::OutputError;
use crate::forecast::ForecastFrame;

#[derive(Debug, Serialize)]
struct ForecastRow {
    date: String,
    forecast_temperature: f64,
}

/// Writes `date,forecast_temperature` rows to any writer.
pub fn write_forecast<W: Write>(frame: &ForecastFrame, writer: W) -> Result<(), OutputError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let format = frame.frequency.date_format();

    for (ts, value) in &frame.points {
        csv_writer.serialize(ForecastRow {
            date: ts.format(format).to_string(),
            forecast_temperature: *value,
        })?;
    }
    // The header comes from the first row; emit it for empty frames too
    if frame.is_empty() {
        csv_writer.write_record(["date", "forecast_temperature"])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Writes the forecast CSV to `path`, replacing any existing file.
pub fn save_forecast_csv<P: AsRef<Path>>(frame: &ForecastFrame, path: P) -> Result<(), OutputError> {
    let file = std::fs::File::create(path)?;
    write_forecast(frame, std::io::BufWriter::new(file))
}
