use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

/// Builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Placeholder detection
    pub placeholder: PlaceholderConfig,

    /// Dependency installation
    pub install: InstallConfig,

    /// Capacity of the build event channel
    pub event_capacity: usize,

    /// Default log level when RUST_LOG is unset
    pub log_level: LogLevel,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            placeholder: PlaceholderConfig::default(),
            install: InstallConfig::default(),
            event_capacity: 256,
            log_level: LogLevel::Warn,
        }
    }
}

impl BuilderConfig {
    /// Read a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::Config(format!("Failed to read config at {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML config document. An empty document yields defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| BuildError::Config(format!("Invalid config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load from an explicit path, else the default location if it exists,
    /// else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let default_path = default_config_path();
        if default_path.is_file() {
            tracing::debug!(path = %default_path.display(), "Loading default config");
            return Self::from_file(&default_path);
        }
        Ok(Self::default())
    }

    fn check(&self) -> Result<()> {
        if self.placeholder.sentinels.iter().any(|s| s.is_empty()) {
            return Err(BuildError::Config(
                "placeholder.sentinels must not contain empty strings".to_string(),
            ));
        }
        if self.install.shell.is_empty() {
            return Err(BuildError::Config("install.shell must not be empty".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(BuildError::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Return the default config path (~/.boxfile/config.yaml).
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".boxfile"))
        .unwrap_or_else(|| PathBuf::from(".boxfile"))
        .join("config.yaml")
}

/// Placeholder detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    /// Tokens marking a value the operator must still supply
    pub sentinels: Vec<String>,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            sentinels: vec!["CHANGEME".to_string(), "{{".to_string()],
        }
    }
}

/// Dependency installation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Actually run install commands instead of recording them
    pub execute: bool,

    /// Shell argv prefix the command is appended to
    pub shell: Vec<String>,

    /// chroot into the build rootfs before running
    pub chroot: bool,

    /// Per-install timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            execute: false,
            shell: vec!["/bin/sh".to_string(), "-c".to_string()],
            chroot: false,
            timeout_secs: None,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive string for tracing-subscriber.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
