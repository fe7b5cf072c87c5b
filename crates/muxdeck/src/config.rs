//! Configuration management for muxdeck.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/muxdeck/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::SshOptions;
use crate::session::{BindingTiming, ControllerOptions};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("{name} must be at most {max} ms, got {value}")]
    InvalidTiming {
        name: &'static str,
        value: u64,
        max: u64,
    },

    #[error("auto_attach_limit must be between 1 and 32, got {0}")]
    InvalidAutoAttachLimit(usize),

    #[error("default_port must be non-zero")]
    InvalidPort,

    #[error("ssh_binary must not be empty")]
    EmptySshBinary,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for any single handshake or debounce delay.
const MAX_TIMING_MS: u64 = 60_000;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Paths and logging.
    pub general: GeneralConfig,

    /// Attach handshake and resize timing.
    pub timing: TimingConfig,

    /// Attachment behavior.
    pub attach: AttachConfig,

    /// OpenSSH client settings.
    pub ssh: SshConfig,
}

/// Paths and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for persisted order, notes and preferences.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

/// Handshake and debounce delays, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after opening a dedicated connection.
    pub connect_settle_ms: u64,

    /// Wait after sending the attach command.
    pub attach_settle_ms: u64,

    /// Gap between the two redraw resizes.
    pub resize_kick_ms: u64,

    /// Viewport resize debounce.
    pub resize_debounce_ms: u64,

    /// Viewport resizes are ignored this long after mount.
    pub resize_warmup_ms: u64,

    /// Delay before refreshing after a force-detach.
    pub force_detach_settle_ms: u64,
}

/// Attachment behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttachConfig {
    /// Most sessions auto-attach opens on first refresh.
    pub auto_attach_limit: usize,
}

/// OpenSSH client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// The `ssh` executable.
    pub ssh_binary: String,

    /// Port used when the host spec has none.
    pub default_port: u16,

    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_settle_ms: 100,
            attach_settle_ms: 500,
            resize_kick_ms: 50,
            resize_debounce_ms: 100,
            resize_warmup_ms: 500,
            force_detach_settle_ms: 1000,
        }
    }
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            auto_attach_limit: 6,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            default_port: 22,
            connect_timeout_secs: 10,
        }
    }
}

impl TimingConfig {
    /// Delays used by terminal bindings.
    pub fn binding_timing(&self) -> BindingTiming {
        BindingTiming {
            connect_settle: Duration::from_millis(self.connect_settle_ms),
            attach_settle: Duration::from_millis(self.attach_settle_ms),
            resize_kick: Duration::from_millis(self.resize_kick_ms),
            resize_debounce: Duration::from_millis(self.resize_debounce_ms),
            resize_warmup: Duration::from_millis(self.resize_warmup_ms),
        }
    }

    fn entries(&self) -> [(&'static str, u64); 6] {
        [
            ("connect_settle_ms", self.connect_settle_ms),
            ("attach_settle_ms", self.attach_settle_ms),
            ("resize_kick_ms", self.resize_kick_ms),
            ("resize_debounce_ms", self.resize_debounce_ms),
            ("resize_warmup_ms", self.resize_warmup_ms),
            ("force_detach_settle_ms", self.force_detach_settle_ms),
        ]
    }
}

impl SshConfig {
    /// Options for [`crate::host::SshHost`].
    pub fn options(&self) -> SshOptions {
        SshOptions {
            ssh_binary: PathBuf::from(&self.ssh_binary),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("muxdeck")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("muxdeck")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - MUXDECK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - MUXDECK_DATA_DIR: Override the data directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("MUXDECK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.general.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("MUXDECK_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.general.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.general.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.general.log_level.clone()));
        }

        for (name, value) in self.timing.entries() {
            if value > MAX_TIMING_MS {
                return Err(ConfigError::InvalidTiming {
                    name,
                    value,
                    max: MAX_TIMING_MS,
                });
            }
        }

        let limit = self.attach.auto_attach_limit;
        if !(1..=32).contains(&limit) {
            return Err(ConfigError::InvalidAutoAttachLimit(limit));
        }

        if self.ssh.default_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.ssh.ssh_binary.trim().is_empty() {
            return Err(ConfigError::EmptySshBinary);
        }

        Ok(())
    }

    /// Options for [`crate::session::SessionController`].
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            timing: self.timing.binding_timing(),
            auto_attach_limit: self.attach.auto_attach_limit,
            force_detach_settle: Duration::from_millis(self.timing.force_detach_settle_ms),
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Writes the default configuration to `path`.
    ///
    /// Refuses to replace an existing file unless `force` is set.
    pub fn init_file<P: AsRef<Path>>(path: P, force: bool) -> Result<()> {
        let path = path.as_ref();
        if path.exists() && !force {
            anyhow::bail!(
                "Config file already exists: {} (use --force to overwrite)",
                path.display()
            );
        }
        Self::default().save(path)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.general.log_level, "info");
        assert!(config.general.log_file.is_none());
        assert_eq!(config.timing.connect_settle_ms, 100);
        assert_eq!(config.timing.attach_settle_ms, 500);
        assert_eq!(config.timing.resize_kick_ms, 50);
        assert_eq!(config.timing.resize_debounce_ms, 100);
        assert_eq!(config.timing.resize_warmup_ms, 500);
        assert_eq!(config.timing.force_detach_settle_ms, 1000);
        assert_eq!(config.attach.auto_attach_limit, 6);
        assert_eq!(config.ssh.ssh_binary, "ssh");
        assert_eq!(config.ssh.default_port, 22);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_data_dir() {
        let config = GeneralConfig::default();
        assert!(config.data_dir.to_string_lossy().contains("muxdeck"));
    }

    #[test]
    fn test_binding_timing_matches_defaults() {
        assert_eq!(TimingConfig::default().binding_timing(), BindingTiming::default());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[general]
log_level = "debug"

[timing]
attach_settle_ms = 800
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.timing.attach_settle_ms, 800);
        assert_eq!(config.timing.connect_settle_ms, 100);
        assert_eq!(config.attach.auto_attach_limit, 6);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[general]
data_dir = "/custom/data"
log_level = "trace"
log_file = "/var/log/muxdeck.log"

[timing]
connect_settle_ms = 200
attach_settle_ms = 1000
resize_kick_ms = 80
resize_debounce_ms = 150
resize_warmup_ms = 750
force_detach_settle_ms = 2000

[attach]
auto_attach_limit = 4

[ssh]
ssh_binary = "/usr/local/bin/ssh"
default_port = 2222
connect_timeout_secs = 5
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.general.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.general.log_file, Some(PathBuf::from("/var/log/muxdeck.log")));
        assert_eq!(config.timing.force_detach_settle_ms, 2000);
        assert_eq!(config.attach.auto_attach_limit, 4);
        assert_eq!(config.ssh.default_port, 2222);

        let options = config.ssh.options();
        assert_eq!(options.ssh_binary, PathBuf::from("/usr/local/bin/ssh"));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));

        let controller = config.controller_options();
        assert_eq!(controller.auto_attach_limit, 4);
        assert_eq!(controller.force_detach_settle, Duration::from_secs(2));
        assert_eq!(controller.timing.resize_warmup, Duration::from_millis(750));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[general
log_level = "debug"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[attach]
auto_attach_limit = "six"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.general.log_level = "loud".into();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".into()))
        );

        let mut config = Config::default();
        config.attach.auto_attach_limit = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidAutoAttachLimit(0)));
        config.attach.auto_attach_limit = 33;
        assert_eq!(config.validate(), Err(ConfigError::InvalidAutoAttachLimit(33)));

        let mut config = Config::default();
        config.timing.attach_settle_ms = 120_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTiming { name: "attach_settle_ms", .. })
        ));

        let mut config = Config::default();
        config.ssh.default_port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));

        let mut config = Config::default();
        config.ssh.ssh_binary = " ".into();
        assert_eq!(config.validate(), Err(ConfigError::EmptySshBinary));
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = Config::default();
        config.general.log_level = "DEBUG".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.general.log_file = Some(PathBuf::from("/tmp/muxdeck.log"));
        config.timing.resize_kick_ms = 75;
        let parsed = Config::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.attach.auto_attach_limit = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_init_file_writes_defaults_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("muxdeck").join("config.toml");

        Config::init_file(&path, false).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        fs::write(&path, "[attach]\nauto_attach_limit = 2\n").unwrap();
        let err = Config::init_file(&path, false).unwrap_err().to_string();
        assert!(err.contains("already exists"));
        assert_eq!(Config::load(&path).unwrap().attach.auto_attach_limit, 2);

        Config::init_file(&path, true).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "this is not [valid toml").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[general]
log_level = "warn"
colour = "always"

[experimental]
anything = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.general.log_level, "warn");
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("muxdeck/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("MUXDECK_LOG_LEVEL", "trace");
        std::env::set_var("MUXDECK_DATA_DIR", "/srv/muxdeck");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("MUXDECK_LOG_LEVEL");
        std::env::remove_var("MUXDECK_DATA_DIR");

        assert_eq!(config.general.log_level, "trace");
        assert_eq!(config.general.data_dir, PathBuf::from("/srv/muxdeck"));
    }

    #[test]
    #[serial]
    fn test_empty_env_values_ignored() {
        std::env::set_var("MUXDECK_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("MUXDECK_LOG_LEVEL");
        assert_eq!(config.general.log_level, "info");
    }
}
