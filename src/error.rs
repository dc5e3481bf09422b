//! Error types for every stage of the forecasting job.
//!
//! Library code returns these typed errors; the pipeline attaches the stage
//! label with `anyhow` context on top.

use thiserror::Error;

/// Gridded-file (NetCDF) errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: netcdf::Error,
    },

    #[error("failed to read variable `{variable}`: {source}")]
    Read {
        variable: String,
        #[source]
        source: netcdf::Error,
    },

    #[error("malformed NetCDF file: {0}")]
    Malformed(String),

    #[error("variable `{0}` not found in dataset")]
    VariableNotFound(String),

    #[error("could not detect a temperature variable in the dataset")]
    NoTemperatureVariable,

    #[error("variable `{0}` has no time dimension")]
    MissingTimeDimension(String),

    #[error("unsupported time units `{0}`")]
    TimeUnits(String),
}

/// Remote historical fetch errors. None of them are retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Meteomatics credentials missing: set MET_USER and MET_PASS")]
    MissingCredentials,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Meteomatics error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected Meteomatics response format: {0}")]
    UnexpectedFormat(String),
}

/// Errors in series preparation (merge, scaling, windowing).
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no observations available")]
    EmptySeries,

    #[error("lookback must be at least 1")]
    InvalidLookback,

    #[error("need more than {needed} observations, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("series contains non-finite values, cannot fit scaler")]
    NonFinite,
}

/// Model persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(error: serde_json::Error) -> Self {
        PersistenceError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(error: bincode::Error) -> Self {
        PersistenceError::Serialization(error.to_string())
    }
}

/// Training errors.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("no training samples")]
    EmptyDataset,

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] PersistenceError),
}

/// Forecast table output errors.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
