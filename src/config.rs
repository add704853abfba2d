//! Processor and CLI configuration
//!
//! Configuration is plain TOML:
//!
//! ```toml
//! [processor]
//! baseline_window_days = 14
//!
//! [defaults]
//! timezone = "America/New_York"
//! device_id = "whoop-4a1f"
//! ```
//!
//! Every section and key is optional. A non-positive window falls back to
//! [`DEFAULT_BASELINE_WINDOW`], the same rule the C constructor applies.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default baseline window in days
pub const DEFAULT_BASELINE_WINDOW: u32 = 14;

/// Environment variable naming a config file for the CLI
pub const CONFIG_ENV_VAR: &str = "FLUX_CONFIG";

/// Map a requested window length to the one actually used.
pub fn normalize_window_days(requested: i64) -> u32 {
    if requested <= 0 {
        DEFAULT_BASELINE_WINDOW
    } else {
        u32::try_from(requested).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Settings for a [`crate::FluxProcessor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Rolling baseline window length in days
    pub baseline_window_days: i64,
    /// Fixed encoder instance id; a random one is generated when absent
    pub instance_id: Option<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            baseline_window_days: i64::from(DEFAULT_BASELINE_WINDOW),
            instance_id: None,
        }
    }
}

impl ProcessorConfig {
    /// Window length after normalization
    pub fn window_days(&self) -> u32 {
        normalize_window_days(self.baseline_window_days)
    }
}

/// Per-request fallbacks used by the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub timezone: String,
    pub device_id: String,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            device_id: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    pub processor: ProcessorConfig,
    pub defaults: RequestDefaults,
}

impl FluxConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: FluxConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded flux config");
        Ok(config)
    }

    /// Resolve configuration: explicit path, then `FLUX_CONFIG`, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load_from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.defaults.timezone.parse::<Tz>().is_err() {
            errors.push(format!(
                "defaults.timezone '{}' is not an IANA timezone",
                self.defaults.timezone
            ));
        }
        if self.defaults.device_id.trim().is_empty() {
            errors.push("defaults.device_id must not be empty".to_string());
        }
        if matches!(&self.processor.instance_id, Some(id) if id.trim().is_empty()) {
            errors.push("processor.instance_id must not be blank".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
