//! Run parameters for the forecasting job.
//!
//! Everything is fixed by [`PipelineConfig::default`]; a TOML file named by
//! `SKYCAST_CONFIG` may override any subset of fields. API credentials are
//! only ever read from `MET_USER` / `MET_PASS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::series::Frequency;
use crate::training::{EarlyStoppingConfig, PlateauConfig, TrainingConfig};

pub const CONFIG_ENV: &str = "SKYCAST_CONFIG";
pub const USER_ENV: &str = "MET_USER";
pub const PASS_ENV: &str = "MET_PASS";

/// Meteomatics basic-auth credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Reads `MET_USER` and `MET_PASS`; `None` if either is unset or empty
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USER_ENV).ok().filter(|v| !v.is_empty())?;
        let password = std::env::var(PASS_ENV).ok().filter(|v| !v.is_empty())?;
        Some(Credentials { username, password })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Gridded climate file (NetCDF classic or NetCDF-4)
    pub source_path: PathBuf,
    /// Temperature variable; auto-detected when absent
    pub variable_name: Option<String>,

    pub fetch_start: NaiveDate,
    pub fetch_end: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    pub frequency: Frequency,
    pub parameter: String,
    pub api_base_url: String,
    pub request_timeout_secs: u64,

    /// Lookback window length
    pub lookback: usize,
    /// Forecast horizon in periods
    pub horizon: usize,

    pub hidden_size: usize,
    pub num_layers: usize,
    pub dense_size: usize,

    pub batch_size: usize,
    pub epochs: usize,
    pub validation_split: f64,
    pub learning_rate: f64,
    pub seed: u64,
    pub clip_gradient: Option<f64>,
    pub print_every: usize,
    pub early_stopping_patience: usize,
    pub plateau_factor: f64,
    pub plateau_patience: usize,
    pub min_learning_rate: f64,

    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model_name: String,
    pub results_csv: String,

    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("temperatura_2019.nc"),
            variable_name: None,
            fetch_start: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            fetch_end: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap_or_default(),
            // Lima, Peru
            latitude: -12.04318,
            longitude: -77.02824,
            frequency: Frequency::Daily,
            parameter: "t_2m:C".to_string(),
            api_base_url: "https://api.meteomatics.com".to_string(),
            request_timeout_secs: 60,
            lookback: 30,
            horizon: 180,
            hidden_size: 64,
            num_layers: 1,
            dense_size: 32,
            batch_size: 32,
            epochs: 200,
            validation_split: 0.15,
            learning_rate: 0.001,
            seed: 42,
            clip_gradient: Some(5.0),
            print_every: 10,
            early_stopping_patience: 20,
            plateau_factor: 0.5,
            plateau_patience: 10,
            min_learning_rate: 1e-5,
            model_dir: PathBuf::from("./models"),
            output_dir: PathBuf::from("./outputs"),
            model_name: "lstm_temp_peru_2019_2025.bin".to_string(),
            results_csv: "forecastt_6months_peru_2019_2025.csv".to_string(),
            credentials: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overridden by the `SKYCAST_CONFIG` file if set, with
    /// credentials from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.credentials = Credentials::from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.lookback == 0 {
            return invalid("lookback must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if self.hidden_size == 0 || self.num_layers == 0 || self.dense_size == 0 {
            return invalid("model sizes must be positive");
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return invalid("validation_split must be in [0, 1)");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if self.fetch_end < self.fetch_start {
            return invalid("fetch_end is before fetch_start");
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return invalid("coordinate out of range");
        }
        if self.model_name.is_empty() || self.results_csv.is_empty() {
            return invalid("artifact file names must not be empty");
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }

    /// Best-epoch checkpoint written during training
    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_dir.join(format!("best_{}", self.model_name))
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(&self.results_csv)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            shuffle: true,
            seed: self.seed,
            print_every: self.print_every,
            clip_gradient: self.clip_gradient,
            log_lr_changes: true,
            early_stopping: Some(EarlyStoppingConfig {
                patience: self.early_stopping_patience,
                ..EarlyStoppingConfig::default()
            }),
            lr_plateau: Some(PlateauConfig {
                factor: self.plateau_factor,
                patience: self.plateau_patience,
                min_lr: self.min_learning_rate,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lookback, 30);
        assert_eq!(config.horizon, 180);
        assert_eq!(config.frequency, Frequency::Daily);
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("./models").join("best_lstm_temp_peru_2019_2025.bin")
        );
    }

    #[test]
    fn test_partial_toml_override() {
        let config = PipelineConfig::from_toml(
            r#"
            horizon = 7
            frequency = "hourly"
            fetch_start = "2024-01-01"
            "#,
        )
        .unwrap();

        assert_eq!(config.horizon, 7);
        assert_eq!(config.frequency, Frequency::Hourly);
        assert_eq!(config.fetch_start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(config.lookback, 30);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = PipelineConfig { lookback: 0, ..PipelineConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = PipelineConfig { validation_split: 1.0, ..PipelineConfig::default() };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            fetch_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_frequency_is_parse_error() {
        assert!(matches!(
            PipelineConfig::from_toml(r#"frequency = "weekly""#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials { username: "user".into(), password: "secret".into() };
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_training_config_mapping() {
        let training = PipelineConfig::default().training_config();
        assert_eq!(training.batch_size, 32);
        assert_eq!(training.early_stopping.unwrap().patience, 20);
        assert_eq!(training.lr_plateau.unwrap().min_lr, 1e-5);
    }
}
