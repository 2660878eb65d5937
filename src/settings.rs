//! Configuration loading using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (`config/rf_daq.toml` by default)
//! 3. environment variables prefixed with `RF_DAQ_`, nested keys separated
//!    by `__` (e.g. `RF_DAQ_SCPI__HOST=10.0.0.5`)
//!
//! # Example
//! ```no_run
//! use rf_daq::settings::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Analyzer at {}:{}", settings.scpi.host, settings.scpi.analyzer_port);
//! # Ok::<(), rf_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::interceptor::ErrorPolicy;
use crate::scpi::{ANALYZER_PORT, DEFAULT_TIMEOUT_MS, GENERATOR_PORT};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/rf_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RF_DAQ_";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// SCPI transport settings
    pub scpi: ScpiSettings,
    /// Streaming loop settings
    pub streaming: StreamingSettings,
    /// Status interception settings
    pub interceptor: InterceptorSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "rf_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// SCPI transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScpiSettings {
    /// Host running the instrument applications
    pub host: String,
    /// Spectrum analyzer control port
    pub analyzer_port: u16,
    /// Signal generator control port
    pub generator_port: u16,
    /// Reply read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Interval between `*ESR?` polls in milliseconds
    pub opc_poll_interval_ms: u64,
    /// Upper bound on a completion wait in milliseconds
    pub opc_timeout_ms: u64,
}

impl Default for ScpiSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            analyzer_port: ANALYZER_PORT,
            generator_port: GENERATOR_PORT,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            opc_poll_interval_ms: 16,
            opc_timeout_ms: 10_000,
        }
    }
}

/// Streaming loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Samples fetched per call
    pub samples_per_capture: usize,
    /// Number of fetch calls
    pub captures: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            samples_per_capture: 262_144,
            captures: 100,
        }
    }
}

/// Status interception settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InterceptorSettings {
    /// What happens on an error status: `propagate` or `exit`
    pub policy: ErrorPolicy,
}

impl Settings {
    /// Load from the default file and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "Settings loaded");
        Ok(settings)
    }

    /// The provider stack used by [`Settings::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate semantic constraints serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.scpi.host.trim().is_empty() {
            return Err(DaqError::Configuration("scpi.host must not be empty".into()));
        }
        if self.scpi.analyzer_port == 0 || self.scpi.generator_port == 0 {
            return Err(DaqError::Configuration(
                "scpi ports must be non-zero".into(),
            ));
        }
        if self.scpi.opc_poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "scpi.opc_poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.scpi.opc_timeout_ms < self.scpi.opc_poll_interval_ms {
            return Err(DaqError::Configuration(format!(
                "scpi.opc_timeout_ms ({}) must be at least the poll interval ({})",
                self.scpi.opc_timeout_ms, self.scpi.opc_poll_interval_ms
            )));
        }

        if self.streaming.samples_per_capture == 0 {
            return Err(DaqError::Configuration(
                "streaming.samples_per_capture must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
