// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration for the control-loop simulation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Most samples the DSP thread renders in one tick.
pub const MAX_BLOCK_LEN: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("No config directory found")]
    NoConfigDir,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for the periodic consumer ("DSP") thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Period of the control loop in microseconds.
    pub period_us: u64,
    /// How long the simulation runs, in milliseconds.
    pub duration_ms: u64,
    /// Simulated sample rate in Hz.
    pub sample_rate: f64,
}

impl ControlConfig {
    /// Samples rendered per tick, at least one.
    pub fn block_len(&self) -> usize {
        let period = self.period_us as f64 / 1_000_000.0;
        ((self.sample_rate * period).round() as usize).max(1)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_us: 1000,
            duration_ms: 500,
            sample_rate: 48000.0,
        }
    }
}

/// Settings for the producer ("UI") threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Number of producer threads.
    pub count: usize,
    /// Pause between publishes, in milliseconds.
    pub interval_ms: u64,
    /// Lowest cutoff of the filter sweep in Hz.
    pub cutoff_start_hz: f64,
    /// Highest cutoff of the filter sweep in Hz.
    pub cutoff_end_hz: f64,
    /// Filter resonance.
    pub q: f64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            interval_ms: 5,
            cutoff_start_hz: 200.0,
            cutoff_end_hz: 8000.0,
            q: 0.707,
        }
    }
}

/// Complete simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub producers: ProducerConfig,
}

impl DemoConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Reject settings the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nyquist = self.control.sample_rate / 2.0;

        if self.control.period_us == 0 {
            return Err(ConfigError::Invalid("control.period_us must be > 0".into()));
        }
        if !(self.control.sample_rate.is_finite() && self.control.sample_rate > 0.0) {
            return Err(ConfigError::Invalid(
                "control.sample_rate must be finite and > 0".into(),
            ));
        }
        if self.control.block_len() > MAX_BLOCK_LEN {
            return Err(ConfigError::Invalid(format!(
                "control.period_us * control.sample_rate exceeds {MAX_BLOCK_LEN} samples per tick"
            )));
        }
        if self.producers.count == 0 {
            return Err(ConfigError::Invalid("producers.count must be >= 1".into()));
        }
        for (name, hz) in [
            ("cutoff_start_hz", self.producers.cutoff_start_hz),
            ("cutoff_end_hz", self.producers.cutoff_end_hz),
        ] {
            if !(hz > 0.0 && hz < nyquist) {
                return Err(ConfigError::Invalid(format!(
                    "producers.{name} must be within (0, {nyquist})"
                )));
            }
        }
        if !(self.producers.q.is_finite() && self.producers.q > 0.0) {
            return Err(ConfigError::Invalid("producers.q must be finite and > 0".into()));
        }

        Ok(())
    }
}

/// Manages the configuration file location.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a config manager for the platform config directory.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = directories::ProjectDirs::from("", "", "paramslot")
            .map(|d| d.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)?;

        Self::with_dir(config_dir)
    }

    /// Create a config manager rooted at `config_dir`.
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.into();
        fs::create_dir_all(&config_dir)?;

        debug!("Config directory: {:?}", config_dir);
        Ok(Self { config_dir })
    }

    /// Get the path to the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Load the config file, or defaults when there is none.
    pub fn load_config(&self) -> Result<DemoConfig, ConfigError> {
        Self::load_config_from(&self.config_path())
    }

    /// Load config from an explicit path, or defaults when it does not exist.
    pub fn load_config_from(path: &Path) -> Result<DemoConfig, ConfigError> {
        if !path.exists() {
            debug!("No config found at {:?}, using defaults", path);
            return Ok(DemoConfig::default());
        }

        let content = fs::read_to_string(path)?;
        let config = DemoConfig::from_toml(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save the config file.
    pub fn save_config(&self, config: &DemoConfig) -> Result<(), ConfigError> {
        let path = self.config_path();
        let content = config.to_toml()?;
        fs::write(&path, content)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }
}
