//! Configuration management for the time tracker agent

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Block, screenshot window and sampling cadence
    #[serde(default)]
    pub timer: TimerConfig,

    /// Screenshot capture configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Input activity configuration
    #[serde(default)]
    pub activity: ActivityConfig,

    /// Snapshot and block storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Length of one accounting block
    #[serde(default = "default_block_length")]
    pub block_length_secs: u64,

    /// A stopped block shorter than this is discarded
    #[serde(default = "default_partial_threshold")]
    pub partial_block_threshold_secs: u64,

    /// Earliest screenshot offset from block start
    #[serde(default = "default_screenshot_min")]
    pub screenshot_min_delay_secs: u64,

    /// Latest screenshot offset from block start
    #[serde(default = "default_screenshot_max")]
    pub screenshot_max_delay_secs: u64,

    /// Activity sampling window
    #[serde(default = "default_sample_interval")]
    pub activity_sample_interval_secs: u64,

    /// UI tick cadence (ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// How often the live snapshot is rewritten while running
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureProviderKind {
    /// OS-level screenshot command
    Command,
    /// Screenshots disabled
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Whether screenshots are taken at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_provider")]
    pub provider: CaptureProviderKind,

    /// Override for the platform screenshot command. `{path}` is replaced
    /// with the output file.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// JPEG quality, 1-100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default = "default_max_width")]
    pub max_width: u32,

    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// Give up on a capture after this long
    #[serde(default = "default_capture_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Try OS-level global input hooks before falling back to host-fed events
    #[serde(default = "default_true")]
    pub global_hooks: bool,

    #[serde(default = "default_true")]
    pub capture_keyboard: bool,

    #[serde(default = "default_true")]
    pub capture_mouse_move: bool,

    #[serde(default = "default_true")]
    pub capture_mouse_click: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where snapshots, block ledgers and screenshots are written
    #[serde(default)]
    pub data_directory: Option<PathBuf>,

    /// First retry delay for blocks that failed to persist
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// Upper bound on the retry delay
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,
}

// Default value functions
fn default_block_length() -> u64 {
    600 // 10 minutes
}

fn default_partial_threshold() -> u64 {
    300
}

fn default_screenshot_min() -> u64 {
    120
}

fn default_screenshot_max() -> u64 {
    540
}

fn default_sample_interval() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_snapshot_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_provider() -> CaptureProviderKind {
    CaptureProviderKind::Command
}

fn default_jpeg_quality() -> u8 {
    60
}

fn default_max_width() -> u32 {
    1920
}

fn default_max_height() -> u32 {
    1080
}

fn default_capture_timeout() -> u64 {
    30
}

fn default_retry_base() -> u64 {
    30
}

fn default_retry_max() -> u64 {
    2 * 60 * 60
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            block_length_secs: default_block_length(),
            partial_block_threshold_secs: default_partial_threshold(),
            screenshot_min_delay_secs: default_screenshot_min(),
            screenshot_max_delay_secs: default_screenshot_max(),
            activity_sample_interval_secs: default_sample_interval(),
            tick_interval_ms: default_tick_interval(),
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            command: None,
            jpeg_quality: default_jpeg_quality(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            timeout_secs: default_capture_timeout(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            global_hooks: true,
            capture_keyboard: true,
            capture_mouse_move: true,
            capture_mouse_click: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            retry_base_secs: default_retry_base(),
            retry_max_secs: default_retry_max(),
        }
    }
}

/// Validated timer settings in `chrono` units, as the engine consumes them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub block_length: Duration,
    pub partial_threshold: Duration,
    pub screenshot_min_delay: Duration,
    pub screenshot_max_delay: Duration,
    pub sample_interval: Duration,
    pub tick_interval: Duration,
    pub snapshot_interval: Duration,
}

impl TimerConfig {
    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_length_secs == 0 {
            return Err(ConfigError::Zero("block_length_secs"));
        }
        if self.activity_sample_interval_secs == 0 {
            return Err(ConfigError::Zero("activity_sample_interval_secs"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("tick_interval_ms"));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Zero("snapshot_interval_secs"));
        }
        if self.screenshot_min_delay_secs > self.screenshot_max_delay_secs {
            return Err(ConfigError::InvertedScreenshotWindow {
                min: self.screenshot_min_delay_secs,
                max: self.screenshot_max_delay_secs,
            });
        }
        if self.screenshot_max_delay_secs > self.block_length_secs {
            return Err(ConfigError::ExceedsBlock {
                name: "screenshot_max_delay_secs",
                value: self.screenshot_max_delay_secs,
                block: self.block_length_secs,
            });
        }
        if self.partial_block_threshold_secs > self.block_length_secs {
            return Err(ConfigError::ExceedsBlock {
                name: "partial_block_threshold_secs",
                value: self.partial_block_threshold_secs,
                block: self.block_length_secs,
            });
        }
        Ok(())
    }

    /// Validate and convert to engine settings
    pub fn to_settings(&self) -> Result<TimerSettings, ConfigError> {
        self.validate()?;
        Ok(self.settings_unchecked())
    }

    fn settings_unchecked(&self) -> TimerSettings {
        TimerSettings {
            block_length: secs(self.block_length_secs),
            partial_threshold: secs(self.partial_block_threshold_secs),
            screenshot_min_delay: secs(self.screenshot_min_delay_secs),
            screenshot_max_delay: secs(self.screenshot_max_delay_secs),
            sample_interval: secs(self.activity_sample_interval_secs),
            tick_interval: Duration::milliseconds(self.tick_interval_ms as i64),
            snapshot_interval: secs(self.snapshot_interval_secs),
        }
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerConfig::default().settings_unchecked()
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value as i64)
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config
                .timer
                .validate()
                .with_context(|| format!("Invalid [timer] section in {:?}", config_path))?;

            config.config_path = Some(config_path);
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Resolve the data directory, falling back to the platform data dir
    pub fn data_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_directory {
            return Ok(dir.clone());
        }
        let proj_dirs = directories::ProjectDirs::from("dev", "time-tracker", "agent")
            .context("Failed to determine data directory")?;
        Ok(proj_dirs.data_local_dir().to_path_buf())
    }

    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "time-tracker", "agent")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timer_config_matches_tracker_defaults() {
        let settings = TimerConfig::default().to_settings().unwrap();
        assert_eq!(settings.block_length, Duration::minutes(10));
        assert_eq!(settings.partial_threshold, Duration::minutes(5));
        assert_eq!(settings.screenshot_min_delay, Duration::minutes(2));
        assert_eq!(settings.screenshot_max_delay, Duration::minutes(9));
        assert_eq!(settings.sample_interval, Duration::seconds(10));
    }

    #[test]
    fn test_rejects_inverted_window() {
        let config = TimerConfig {
            screenshot_min_delay_secs: 300,
            screenshot_max_delay_secs: 200,
            ..TimerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedScreenshotWindow { min: 300, max: 200 })
        );
    }

    #[test]
    fn test_rejects_threshold_longer_than_block() {
        let config = TimerConfig {
            partial_block_threshold_secs: 700,
            ..TimerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExceedsBlock { name: "partial_block_threshold_secs", .. })
        ));
    }

    #[test]
    fn test_rejects_zero_sample_interval() {
        let config = TimerConfig {
            activity_sample_interval_secs: 0,
            ..TimerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("activity_sample_interval_secs"))
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timer]
            block_length_secs = 60
            partial_block_threshold_secs = 30
            screenshot_min_delay_secs = 10
            screenshot_max_delay_secs = 50

            [capture]
            provider = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.timer.block_length_secs, 60);
        assert_eq!(config.timer.activity_sample_interval_secs, 10);
        assert_eq!(config.capture.provider, CaptureProviderKind::None);
        assert_eq!(config.capture.jpeg_quality, 60);
        assert!(config.activity.capture_keyboard);
        assert!(config.timer.validate().is_ok());
    }
}
