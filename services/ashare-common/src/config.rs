//! Configuration management for the A-share data services.
//!
//! Services share one configuration file at `~/.ashare/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (applied by [`Config::load_with_env`] only)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//! - `ASHARE_LOG_LEVEL` → observability.log_level
//! - `ASHARE_LOG_FORMAT` → observability.log_format
//! - `TUSHARE_TOKEN` → providers.tushare.token
//!
//! The data layer itself never reads the environment; it receives the
//! sections below as explicit values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result, ResultExt};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ashare"),
        |dirs| dirs.home_dir().join(".ashare"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Data Layer Configuration
// ============================================================================

/// What a multi-leg fetch does when one leg exhausts its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// Stop at the first exhausted leg and return what was gathered so far.
    FailFast,
    /// Record the failed leg and keep fetching the remaining ones.
    #[default]
    BestEffort,
}

impl std::fmt::Display for PartialFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

impl std::str::FromStr for PartialFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown partial failure policy '{other}'")),
        }
    }
}

/// Retry, timeout and caching parameters for the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Retries per leg after the first attempt (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential retry backoff in milliseconds (default: 500)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds (default: 8000)
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Timeout applied to every upstream call in seconds (default: 10)
    #[serde(default = "default_timeout_per_call_secs")]
    pub timeout_per_call_secs: u64,

    /// Partial failure policy for multi-leg requests
    #[serde(default)]
    pub on_partial_failure: PartialFailurePolicy,

    /// Number of cached reports kept; 0 disables caching (default: 128)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Legs fetched concurrently under best-effort (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl DataConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn timeout_per_call(&self) -> Duration {
        Duration::from_secs(self.timeout_per_call_secs)
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            timeout_per_call_secs: default_timeout_per_call_secs(),
            on_partial_failure: PartialFailurePolicy::default(),
            cache_capacity: default_cache_capacity(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_retry_backoff_max_ms() -> u64 {
    8_000
}

fn default_timeout_per_call_secs() -> u64 {
    10
}

fn default_cache_capacity() -> usize {
    128
}

fn default_concurrency() -> usize {
    4
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Eastmoney public endpoints (no key required).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EastmoneyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Priority (lower = higher priority, 1 is highest)
    #[serde(default = "default_eastmoney_priority")]
    pub priority: u8,

    #[serde(default = "default_eastmoney_kline_url")]
    pub kline_url: String,

    #[serde(default = "default_eastmoney_tick_url")]
    pub tick_url: String,

    #[serde(default = "default_eastmoney_notice_url")]
    pub notice_url: String,

    #[serde(default = "default_eastmoney_rpm")]
    pub requests_per_minute: u32,
}

impl Default for EastmoneyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_eastmoney_priority(),
            kline_url: default_eastmoney_kline_url(),
            tick_url: default_eastmoney_tick_url(),
            notice_url: default_eastmoney_notice_url(),
            requests_per_minute: default_eastmoney_rpm(),
        }
    }
}

fn default_eastmoney_priority() -> u8 {
    1
}

fn default_eastmoney_kline_url() -> String {
    "https://push2his.eastmoney.com/api/qt/stock/kline/get".to_string()
}

fn default_eastmoney_tick_url() -> String {
    "https://push2.eastmoney.com/api/qt/stock/details/get".to_string()
}

fn default_eastmoney_notice_url() -> String {
    "https://np-anotice-stock.eastmoney.com/api/security/ann".to_string()
}

fn default_eastmoney_rpm() -> u32 {
    120
}

/// Tushare Pro API (token required).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TushareConfig {
    #[serde(default)]
    pub enabled: bool,

    /// API token from https://tushare.pro
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_tushare_priority")]
    pub priority: u8,

    #[serde(default = "default_tushare_url")]
    pub base_url: String,

    /// Basic accounts get 200 requests/minute
    #[serde(default = "default_tushare_rpm")]
    pub requests_per_minute: u32,
}

impl Default for TushareConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            priority: default_tushare_priority(),
            base_url: default_tushare_url(),
            requests_per_minute: default_tushare_rpm(),
        }
    }
}

fn default_tushare_priority() -> u8 {
    2
}

fn default_tushare_url() -> String {
    "http://api.tushare.pro".to_string()
}

fn default_tushare_rpm() -> u32 {
    200
}

/// Upstream data providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub eastmoney: EastmoneyConfig,

    #[serde(default)]
    pub tushare: TushareConfig,
}

// ============================================================================
// Observability & Export
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Where exported CSV files are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("ASHARE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("ASHARE_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(token) = lookup("TUSHARE_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.providers.tushare.token = Some(token);
            self.providers.tushare.enabled = true;
        }
    }

    /// Write the configuration as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create {}", parent.display()))?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(Error::from)?;
        fs::write(path, content).context(format!("Failed to write config to {}", path.display()))
    }

    /// The tushare token, if tushare is enabled and a non-empty token is set.
    pub fn tushare_token(&self) -> Option<&str> {
        if !self.providers.tushare.enabled {
            return None;
        }
        self.providers
            .tushare
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}
