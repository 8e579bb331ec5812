//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Settings for a single store provider CLI.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProviderConfig {
    /// Whether a command builder is registered for this provider.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path or name of the provider CLI binary.
    pub binary: String,
    /// Optional provider config directory exported to the child process.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Arguments appended after the built-in install arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl ProviderConfig {
    /// Enabled provider using `binary` and no extra settings.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            enabled: true,
            binary: binary.into(),
            config_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Built-in provider table. Absent providers fall back to their default
/// binary names.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProvidersConfig {
    /// Epic Games Store via `legendary`.
    #[serde(default = "default_epic")]
    pub epic: ProviderConfig,
    /// GOG via `gogdl`.
    #[serde(default = "default_gog")]
    pub gog: ProviderConfig,
    /// Amazon Games via `nile`.
    #[serde(default = "default_amazon")]
    pub amazon: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            epic: default_epic(),
            gog: default_gog(),
            amazon: default_amazon(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_epic() -> ProviderConfig {
    ProviderConfig::with_binary("legendary")
}

fn default_gog() -> ProviderConfig {
    ProviderConfig::with_binary("gogdl")
}

fn default_amazon() -> ProviderConfig {
    ProviderConfig::with_binary("nile")
}

fn default_max_workers() -> usize {
    2
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_update_capacity() -> usize {
    100
}

fn default_reader_drain_ms() -> u64 {
    2000
}

fn default_max_line_bytes() -> usize {
    65_536
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Maximum number of tasks downloading or installing at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Scheduler loop period in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Per-subscriber notification channel capacity.
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
    /// Grace period for output readers after the process exits.
    #[serde(default = "default_reader_drain_ms")]
    pub reader_drain_ms: u64,
    /// Longest accepted output line; longer lines are skipped.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Built-in provider CLIs.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            tick_interval_ms: default_tick_interval_ms(),
            update_capacity: default_update_capacity(),
            reader_drain_ms: default_reader_drain_ms(),
            max_line_bytes: default_max_line_bytes(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Scheduler loop period.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reader drain grace period.
    #[must_use]
    pub fn reader_drain(&self) -> Duration {
        Duration::from_millis(self.reader_drain_ms)
    }

    /// Validate numeric limits and provider binaries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(AppError::Config(
                "max_workers must be greater than zero".into(),
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }

        if self.update_capacity == 0 {
            return Err(AppError::Config(
                "update_capacity must be greater than zero".into(),
            ));
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        for (name, provider) in [
            ("epic", &self.providers.epic),
            ("gog", &self.providers.gog),
            ("amazon", &self.providers.amazon),
        ] {
            if provider.enabled && provider.binary.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "providers.{name}.binary must not be empty"
                )));
            }
        }

        Ok(())
    }
}
