//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATECRAFT_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use statecraft_core::MachineOptions;
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Machine runtime options.
    pub machine: MachineOptions,
    /// Scripted target behavior.
    pub target: TargetConfig,
    /// REPL configuration.
    pub repl: ReplConfig,
}

impl Config {
    /// Loads configuration from `path` (or STATECRAFT_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("STATECRAFT_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.logging.apply_env_overrides();
        apply_machine_env_overrides(&mut self.machine);
        self.target.apply_env_overrides();
        self.repl.apply_env_overrides();
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine.error_event.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "machine.error_event must not be empty".to_string(),
            ));
        }

        if let Some(state) = &self.machine.default_error_state {
            if state.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "machine.default_error_state must not be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("STATECRAFT_LOG") {
            if !level.is_empty() {
                self.level = level;
            }
        }
    }
}

fn apply_machine_env_overrides(machine: &mut MachineOptions) {
    if let Ok(event) = std::env::var("STATECRAFT_ERROR_EVENT") {
        if !event.is_empty() {
            machine.error_event = event;
        }
    }

    if let Ok(state) = std::env::var("STATECRAFT_DEFAULT_ERROR_STATE") {
        machine.default_error_state = if state.is_empty() { None } else { Some(state) };
    }

    if let Ok(dispatch) = std::env::var("STATECRAFT_DISPATCH_ERRORS") {
        machine.dispatch_error_event = dispatch == "1" || dispatch.to_lowercase() == "true";
    }
}

/// Scripted target configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Treat callbacks missing from the target file as no-ops.
    pub lenient_callbacks: bool,
}

impl TargetConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(lenient) = std::env::var("STATECRAFT_LENIENT_CALLBACKS") {
            self.lenient_callbacks = lenient == "1" || lenient.to_lowercase() == "true";
        }
    }
}

/// REPL configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// History file; defaults to ~/.statecraft_history.
    pub history_file: Option<PathBuf>,
}

impl ReplConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STATECRAFT_HISTORY") {
            self.history_file = Some(PathBuf::from(path));
        }
    }

    /// Returns the history file path.
    pub fn history_path(&self) -> PathBuf {
        self.history_file.clone().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".statecraft_history"))
                .unwrap_or_else(|_| ".statecraft_history".into())
        })
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
