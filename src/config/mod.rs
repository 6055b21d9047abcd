//! Configuration module for plynk-rs
//!
//! This module handles engine configuration and the profile store:
//! - `config.toml` with polling, dispatch, listener, transform and logging settings
//! - JSON memory, game and WLED profiles plus the device list (see [`profiles`])
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.plynk.plynk-rs/`
//! - **macOS**: `~/Library/Application Support/dev.plynk.plynk-rs/`
//! - **Windows**: `%APPDATA%\dev.plynk.plynk-rs\`
//!
//! # Files
//!
//! - `config.toml` - Engine settings, every field optional
//! - `profiles/` - Profile store root
//! - `logs/` - Daily rolling log files when file logging is enabled
//!
//! # Example
//!
//! ```ignore
//! use plynk_rs::config::AppConfig;
//!
//! let config = AppConfig::load_or_default(None);
//! println!("polling every {} ms", config.polling.interval_ms);
//! ```

pub mod profiles;

pub use profiles::*;

use crate::error::{PlynkError, Result};
use crate::transform::TransformOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.plynk.plynk-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Log directory name inside the app data directory
pub const LOG_DIR: &str = "logs";

/// Profile directory name inside the app data directory
pub const PROFILES_DIR: &str = "profiles";

/// Default tick interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 16;

/// Bounds for the forced-refresh interval, in ticks
pub const FORCE_UPDATE_RANGE: std::ops::RangeInclusive<u32> = 1..=2000;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        PlynkError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            PlynkError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== App Config ====================

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub polling: PollingConfig,
    pub dispatch: DispatchConfig,
    pub listener: ListenerConfig,
    pub transform: TransformConfig,
    pub logging: LoggingConfig,
    pub profiles: ProfilesConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a config file
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PlynkError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| {
            PlynkError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` or the default location, returning defaults on any error
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(config_path) {
            Some(p) => p,
            None => return Self::default(),
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PlynkError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PlynkError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            PlynkError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject unusable values and clamp the ones with a defined range
    pub fn validate(&mut self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(PlynkError::Config(
                "polling.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.listener.channel_capacity == 0 {
            return Err(PlynkError::Config(
                "listener.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if !self.polling.max_backoff_factor.is_finite() || self.polling.max_backoff_factor < 1.0 {
            return Err(PlynkError::Config(
                "polling.max_backoff_factor must be at least 1.0".to_string(),
            ));
        }

        let clamped = self
            .dispatch
            .force_update_interval
            .clamp(*FORCE_UPDATE_RANGE.start(), *FORCE_UPDATE_RANGE.end());
        if clamped != self.dispatch.force_update_interval {
            tracing::warn!(
                "dispatch.force_update_interval {} out of range, using {}",
                self.dispatch.force_update_interval,
                clamped
            );
            self.dispatch.force_update_interval = clamped;
        }
        Ok(())
    }
}

// ==================== Polling Config ====================

/// Polling scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Tick interval in milliseconds
    pub interval_ms: u64,

    /// Widen the tick delay when ticks overrun the interval
    pub adaptive: bool,

    /// Upper bound on the widened delay, as a multiple of the interval
    pub max_backoff_factor: f64,

    /// Consecutive fast ticks needed before narrowing the delay again
    pub fast_tick_threshold: u32,

    /// Maximum gap between batched addresses in bytes
    pub batch_gap_bytes: usize,

    /// How long a module base may be reused across ticks (0 = every tick)
    pub module_cache_ttl_ms: u64,

    /// Capacity of the scheduler's event channel
    pub event_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            adaptive: true,
            max_backoff_factor: 4.0,
            fast_tick_threshold: 5,
            batch_gap_bytes: crate::backend::read_manager::DEFAULT_GAP_THRESHOLD,
            module_cache_ttl_ms: 0,
            event_capacity: 1024,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn module_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.module_cache_ttl_ms)
    }

    /// Copy with a different interval
    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms.max(1);
        self
    }
}

// ==================== Dispatch Config ====================

/// Dispatch engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Suppress writes whose value did not change
    pub send_only_changed: bool,

    /// Send unconditionally every N evaluations of a row (1-2000)
    pub force_update_interval: u32,

    /// HTTP timeout for WLED requests
    pub wled_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_only_changed: true,
            force_update_interval: 50,
            wled_timeout_ms: 500,
        }
    }
}

impl DispatchConfig {
    pub fn wled_timeout(&self) -> Duration {
        Duration::from_millis(self.wled_timeout_ms)
    }
}

// ==================== Listener Config ====================

/// Message listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bounded packet queue between the pump and the consumer
    pub channel_capacity: usize,

    /// Report a disconnect when no value packet arrives in time
    pub timeout_enabled: bool,

    pub timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            timeout_enabled: false,
            timeout_ms: 5000,
        }
    }
}

impl ListenerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_enabled
            .then(|| Duration::from_millis(self.timeout_ms))
    }
}

// ==================== Transform Config ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Treat templates without `{value}` that are not decimal patterns as literal text
    pub literal_format_fallback: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            literal_format_fallback: true,
        }
    }
}

impl TransformConfig {
    pub fn options(&self) -> TransformOptions {
        TransformOptions {
            literal_format_fallback: self.literal_format_fallback,
        }
    }
}

// ==================== Logging Config ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,

    /// Also write daily rolling log files
    pub file: bool,

    /// Log directory (defaults to `<app data>/logs`)
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,plynk_rs=debug".to_string(),
            file: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| app_data_dir().map(|p| p.join(LOG_DIR)))
    }
}

// ==================== Profiles Config ====================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Profile store root (defaults to `<app data>/profiles`)
    pub root: Option<PathBuf>,
}

impl ProfilesConfig {
    pub fn root(&self) -> Option<PathBuf> {
        self.root
            .clone()
            .or_else(|| app_data_dir().map(|p| p.join(PROFILES_DIR)))
    }
}
