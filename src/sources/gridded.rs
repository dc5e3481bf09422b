//! Point temperature series from a gridded NetCDF file.
//!
//! File access goes through the `netcdf` crate, so classic, 64-bit offset
//! and HDF5-based NetCDF-4 files all load. This module adds what the job
//! needs on top: temperature variable detection, fill and packing handling,
//! CF time decoding, Kelvin to Celsius and the mean over the spatial axes.

use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use netcdf::{AttributeValue, Variable};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::series::{Frequency, TimeSeries};

const TEMPERATURE_CANDIDATES: [&str; 6] = ["t2m", "t_2m", "temperature", "temp", "air_temperature", "t"];
const KELVIN_OFFSET: f64 = 273.15;

/// CF packing attributes of one variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packing {
    pub fill_value: Option<f64>,
    pub missing_value: Option<f64>,
    pub scale_factor: f64,
    pub add_offset: f64,
}

impl Default for Packing {
    fn default() -> Self {
        Packing {
            fill_value: None,
            missing_value: None,
            scale_factor: 1.0,
            add_offset: 0.0,
        }
    }
}

impl Packing {
    fn of(var: &Variable) -> Self {
        Packing {
            fill_value: number_attribute(var, "_FillValue"),
            missing_value: number_attribute(var, "missing_value"),
            scale_factor: number_attribute(var, "scale_factor").unwrap_or(1.0),
            add_offset: number_attribute(var, "add_offset").unwrap_or(0.0),
        }
    }

    /// Fill and missing markers become NaN, everything else is unpacked
    pub fn unpack(&self, raw: f64) -> f64 {
        if Some(raw) == self.fill_value || Some(raw) == self.missing_value {
            f64::NAN
        } else {
            raw * self.scale_factor + self.add_offset
        }
    }
}

fn number_attribute(var: &Variable, name: &str) -> Option<f64> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Longlong(v) => Some(v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|&x| f64::from(x)),
        AttributeValue::Ints(v) => v.first().map(|&x| f64::from(x)),
        AttributeValue::Shorts(v) => v.first().map(|&x| f64::from(x)),
        _ => None,
    }
}

fn text_attribute(var: &Variable, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Strs(v) => v.into_iter().next(),
        _ => None,
    }
}

/// Whole variable as `f64`, unpacked
fn read_unpacked(var: &Variable) -> Result<Vec<f64>, SourceError> {
    let packing = Packing::of(var);
    let raw = var
        .get_values::<f64, _>(..)
        .map_err(|source| SourceError::Read {
            variable: var.name(),
            source,
        })?;
    Ok(raw.into_iter().map(|v| packing.unpack(v)).collect())
}

/// Not a coordinate variable and not a scalar
fn is_data_variable(var: &Variable) -> bool {
    let dims = var.dimensions();
    match dims {
        [] => false,
        [only] => only.name() != var.name(),
        _ => true,
    }
}

/// The usual temperature names first, then any name containing "temp",
/// then the first candidate
pub fn choose_temperature_variable(names: &[String]) -> Option<&str> {
    TEMPERATURE_CANDIDATES
        .iter()
        .find_map(|candidate| names.iter().find(|n| n == candidate))
        .or_else(|| names.iter().find(|n| n.to_lowercase().contains("temp")))
        .or_else(|| names.first())
        .map(String::as_str)
}

/// Name of the temperature variable: `explicit` if given and present,
/// else detected among the data variables
pub fn detect_temperature_variable(file: &netcdf::File, explicit: Option<&str>) -> Result<String, SourceError> {
    if let Some(name) = explicit {
        return file
            .variable(name)
            .map(|v| v.name())
            .ok_or_else(|| SourceError::VariableNotFound(name.to_string()));
    }

    let names: Vec<String> = file
        .variables()
        .filter(|v| is_data_variable(v))
        .map(|v| v.name())
        .collect();
    debug!(?names, "data variables");
    choose_temperature_variable(&names)
        .map(str::to_string)
        .ok_or(SourceError::NoTemperatureVariable)
}

/// Index into `var`'s dimensions of the time axis: a dimension whose
/// coordinate variable carries CF time units, else one named "time"
fn time_axis(file: &netcdf::File, var: &Variable) -> Option<usize> {
    let dims = var.dimensions();
    let is_cf_time = |dim_name: &str| {
        file.variable(dim_name)
            .and_then(|coord| text_attribute(&coord, "units"))
            .map_or(false, |units| units.contains(" since "))
    };

    dims.iter()
        .position(|d| is_cf_time(&d.name()))
        .or_else(|| dims.iter().position(|d| d.name() == "time"))
}

fn time_coordinate(file: &netcdf::File, dim_name: &str) -> Result<Vec<NaiveDateTime>, SourceError> {
    let coord = file
        .variable(dim_name)
        .ok_or_else(|| SourceError::MissingTimeDimension(dim_name.to_string()))?;
    let units = text_attribute(&coord, "units").ok_or_else(|| SourceError::TimeUnits(String::new()))?;
    decode_times(&read_unpacked(&coord)?, &units)
}

/// Offsets in CF `units` to timestamps, rounded to the millisecond
pub fn decode_times(offsets: &[f64], units: &str) -> Result<Vec<NaiveDateTime>, SourceError> {
    let (step_seconds, reference) = parse_time_units(units)?;
    offsets
        .iter()
        .map(|&value| {
            if !value.is_finite() {
                return Err(SourceError::Malformed(format!("non-finite time offset {}", value)));
            }
            let millis = (value * step_seconds * 1000.0).round() as i64;
            Ok(reference + Duration::milliseconds(millis))
        })
        .collect()
}

/// Splits CF units `<unit> since <reference>` into seconds per unit and
/// the reference instant (interpreted as UTC)
pub fn parse_time_units(units: &str) -> Result<(f64, NaiveDateTime), SourceError> {
    let err = || SourceError::TimeUnits(units.to_string());
    let (unit, reference) = units.split_once(" since ").ok_or_else(err)?;

    let step = match unit.trim().to_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        _ => return Err(err()),
    };

    let reference = reference
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00")
        .trim();

    let parsed = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(reference, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(reference, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(err)?;

    Ok((step, parsed))
}

fn is_kelvin(units: Option<&str>) -> bool {
    matches!(units.map(str::to_lowercase).as_deref(), Some("k" | "kelvin" | "degk" | "kelvins"))
}

/// Averages every non-time axis, skipping NaN. `time_axis` indexes `shape`.
fn mean_over_space(values: &[f64], shape: &[usize], time_axis: usize) -> Vec<f64> {
    let n_time = shape[time_axis];
    let inner: usize = shape[time_axis + 1..].iter().product();
    let mut sums = vec![0.0; n_time];
    let mut counts = vec![0usize; n_time];

    for (i, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        let t = (i / inner.max(1)) % n_time.max(1);
        sums[t] += value;
        counts[t] += 1;
    }

    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| if count > 0 { sum / count as f64 } else { f64::NAN })
        .collect()
}

/// Loads the point temperature series from a gridded file, in °C,
/// resampled to `freq`.
pub fn load_temperature_series<P: AsRef<Path>>(
    path: P,
    variable_name: Option<&str>,
    freq: Frequency,
) -> Result<TimeSeries, SourceError> {
    let path = path.as_ref();
    let file = netcdf::open(path).map_err(|source| SourceError::Open {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), "opened gridded file");
    file_temperature_series(&file, variable_name, freq)
}

/// [`load_temperature_series`] for an already opened file
pub fn file_temperature_series(
    file: &netcdf::File,
    variable_name: Option<&str>,
    freq: Frequency,
) -> Result<TimeSeries, SourceError> {
    let name = detect_temperature_variable(file, variable_name)?;
    let var = file
        .variable(&name)
        .ok_or_else(|| SourceError::VariableNotFound(name.clone()))?;

    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let axis = time_axis(file, &var).ok_or_else(|| SourceError::MissingTimeDimension(name.clone()))?;
    let times = time_coordinate(file, &var.dimensions()[axis].name())?;
    if times.len() != shape[axis] {
        return Err(SourceError::Malformed(format!(
            "time coordinate has {} values, axis has {}",
            times.len(),
            shape[axis]
        )));
    }

    let mut values = read_unpacked(&var)?;
    let units = text_attribute(&var, "units");
    if is_kelvin(units.as_deref()) {
        values.iter_mut().for_each(|v| *v -= KELVIN_OFFSET);
    }

    let means = mean_over_space(&values, &shape, axis);
    let series = TimeSeries::resample_mean("temperature_nc", times.into_iter().zip(means), freq);

    info!(
        variable = %name,
        units = units.as_deref().unwrap_or("unknown"),
        raw_steps = shape[axis],
        points = series.len(),
        "loaded gridded temperature series"
    );
    Ok(series)
}
