use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ml::hmm::{FitOptions, RowPolicy, MAX_STATES, MIN_STATES};

pub const DEFAULT_CONFIG_FILE: &str = "season_hmm.toml";
pub const ENV_PREFIX: &str = "SEASON_HMM";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Layer defaults, then the TOML file if it exists, then
    /// `SEASON_HMM__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Model validation
        if self.model.n_states < MIN_STATES || self.model.n_states > MAX_STATES {
            errors.push(format!(
                "model.n_states must be between {} and {}",
                MIN_STATES, MAX_STATES
            ));
        }
        let fit = &self.model.fit;
        if fit.max_iter == 0 {
            errors.push("model.fit.max_iter must be > 0".to_string());
        }
        if !(fit.tol > 0.0 && fit.tol.is_finite()) {
            errors.push("model.fit.tol must be > 0".to_string());
        }
        if !(fit.min_covar > 0.0 && fit.min_covar.is_finite()) {
            errors.push("model.fit.min_covar must be > 0".to_string());
        }
        if !(fit.min_state_weight >= 0.0 && fit.min_state_weight.is_finite()) {
            errors.push("model.fit.min_state_weight must be >= 0".to_string());
        }
        if fit.kmeans_iterations == 0 {
            errors.push("model.fit.kmeans_iterations must be > 0".to_string());
        }

        // Server validation
        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.max_upload_bytes == 0 {
            errors.push("server.max_upload_bytes must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Hidden states to fit when a request does not say
    pub n_states: usize,
    /// Seed for parameter initialization
    pub seed: u64,
    pub fit: FitOptions,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            n_states: 3,
            seed: 42,
            fit: FitOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub row_policy: RowPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
