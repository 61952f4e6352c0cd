//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/usagerank/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/usagerank/` (~/.config/usagerank/)
//! - Data: `$XDG_DATA_HOME/usagerank/` (~/.local/share/usagerank/)
//! - State/Logs: `$XDG_STATE_HOME/usagerank/` (~/.local/state/usagerank/)

use crate::error::{Error, Result};
use crate::types::{ALL_COHORT, FREE_COHORT, PAID_COHORT};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Report computation settings
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Report computation settings
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Civil timezone offset in hours east of UTC used for every calendar boundary
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Trailing window length when no start date is given
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Longest accepted date range, in days
    #[serde(default = "default_max_span_days")]
    pub max_span_days: u32,

    /// Top-N used when the caller gives no limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Maximum number of record fetches in flight per request
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Deadline for the whole fetch phase in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Cohorts reported when the caller names none
    #[serde(default = "default_cohorts")]
    pub default_cohorts: Vec<String>,

    /// Lower bounds of the distribution histogram buckets
    #[serde(default = "default_breakpoints")]
    pub distribution_breakpoints: Vec<f64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            default_window_days: default_window_days(),
            max_span_days: default_max_span_days(),
            default_limit: default_limit(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            default_cohorts: default_cohorts(),
            distribution_breakpoints: default_breakpoints(),
        }
    }
}

impl AnalyticsConfig {
    /// The fixed civil timezone.
    pub fn zone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            Error::Config(format!(
                "analytics.utc_offset_hours out of range: {}",
                self.utc_offset_hours
            ))
        })
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(Error::Config(
                "analytics.utc_offset_hours must be between -12 and 14".to_string(),
            ));
        }
        if self.max_span_days == 0 {
            return Err(Error::Config(
                "analytics.max_span_days must be positive".to_string(),
            ));
        }
        if self.default_window_days == 0 || self.default_window_days > self.max_span_days {
            return Err(Error::Config(
                "analytics.default_window_days must be between 1 and max_span_days".to_string(),
            ));
        }
        if self.default_limit == 0 {
            return Err(Error::Config(
                "analytics.default_limit must be positive".to_string(),
            ));
        }
        if self.fetch_concurrency == 0 {
            return Err(Error::Config(
                "analytics.fetch_concurrency must be positive".to_string(),
            ));
        }
        if self.distribution_breakpoints.is_empty()
            || self.distribution_breakpoints.iter().any(|b| !b.is_finite())
            || self
                .distribution_breakpoints
                .windows(2)
                .any(|w| w[0] >= w[1])
        {
            return Err(Error::Config(
                "analytics.distribution_breakpoints must be non-empty, finite and strictly ascending"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_window_days() -> u32 {
    30
}

fn default_max_span_days() -> u32 {
    365
}

fn default_limit() -> usize {
    10
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_fetch_timeout_ms() -> u64 {
    30000
}

fn default_cohorts() -> Vec<String> {
    [ALL_COHORT, PAID_COHORT, FREE_COHORT]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_breakpoints() -> Vec<f64> {
    vec![0.0, 51.0, 101.0, 201.0, 501.0, 1001.0]
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.analytics.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/usagerank/config.toml` (~/.config/usagerank/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("usagerank").join("config.toml")
    }

    /// Returns the data directory path (for the record store)
    ///
    /// `$XDG_DATA_HOME/usagerank/` (~/.local/share/usagerank/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("usagerank")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/usagerank/` (~/.local/state/usagerank/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("usagerank")
    }

    /// Returns the record store file path
    ///
    /// `$XDG_DATA_HOME/usagerank/records.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("records.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/usagerank/usagerank.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("usagerank.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// CLI binaries call this before anything reads these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
