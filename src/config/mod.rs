//! Configuration module for the reservoir pipeline
//!
//! This module handles the pipeline configuration:
//! - Channel sizing and timeouts
//! - Pipeline worker and pool thread counts
//! - Alert threshold and data-processing parameters
//! - Storage connection settings
//! - The simulated sensor fleet ([`SensorSettings`])
//!
//! There is no global configuration: a [`PipelineConfig`] is built (or
//! loaded) once and passed to the constructors that need it.
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory under
//! `dev.hxyulin.reservoir-rs`:
//! - **Linux**: `~/.config/dev.hxyulin.reservoir-rs/reservoir.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.reservoir-rs/reservoir.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.reservoir-rs\reservoir.toml`
//!
//! # Example
//!
//! ```ignore
//! use reservoir_rs::config::PipelineConfig;
//!
//! let config = PipelineConfig::load("reservoir.toml")?;
//! config.validate()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{ReservoirError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.reservoir-rs";

/// Config filename
pub const CONFIG_FILE: &str = "reservoir.toml";

/// Default channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Default timeout for channel push/pop in milliseconds
pub const DEFAULT_CHANNEL_TIMEOUT_MS: u64 = 100;

/// Default alert threshold (high water mark)
pub const DEFAULT_ALERT_THRESHOLD: f64 = 90.0;

/// Default TTL of the `latest:<sensor>` cache entries in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Pipeline Config ====================

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Channel between sensors and workers
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Thread counts
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Alerting
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Batch data processing
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Storage sink
    #[serde(default)]
    pub storage: StorageConfig,

    /// Simulated sensors
    #[serde(default)]
    pub sensors: Vec<SensorSettings>,
}

impl PipelineConfig {
    /// Create a config with defaults and no sensors
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with the demo sensor fleet
    pub fn sample() -> Self {
        Self {
            sensors: vec![
                SensorSettings::water_level("WL001", "Main reservoir dam")
                    .with_interval(Duration::from_millis(3000)),
                SensorSettings::water_level("WL002", "Secondary reservoir")
                    .with_interval(Duration::from_millis(5000)),
                SensorSettings::temperature("TEMP001", "Inlet")
                    .with_interval(Duration::from_millis(8000)),
                SensorSettings::temperature("TEMP002", "Outlet")
                    .with_interval(Duration::from_millis(10000)),
            ],
            ..Self::default()
        }
    }

    /// Add a sensor
    pub fn add_sensor(&mut self, sensor: SensorSettings) {
        self.sensors.push(sensor);
    }

    /// Find a sensor by ID
    pub fn find_sensor(&self, id: &str) -> Option<&SensorSettings> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// Check the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.channel.capacity == 0 {
            return Err(ReservoirError::Config(
                "channel.capacity must be greater than zero".to_string(),
            ));
        }
        if self.workers.pipeline_workers == 0 {
            return Err(ReservoirError::Config(
                "workers.pipeline_workers must be greater than zero".to_string(),
            ));
        }
        if self.workers.pool_threads == 0 {
            return Err(ReservoirError::Config(
                "workers.pool_threads must be greater than zero".to_string(),
            ));
        }
        if let Some(threshold) = self.alerts.threshold {
            if !threshold.is_finite() {
                return Err(ReservoirError::Config(
                    "alerts.threshold must be finite".to_string(),
                ));
            }
        }
        if self.processing.min_valid >= self.processing.max_valid {
            return Err(ReservoirError::Config(
                "processing.min_valid must be below processing.max_valid".to_string(),
            ));
        }
        if !(self.processing.outlier_threshold > 0.0) {
            return Err(ReservoirError::Config(
                "processing.outlier_threshold must be positive".to_string(),
            ));
        }

        for (i, sensor) in self.sensors.iter().enumerate() {
            sensor.validate()?;
            if self.sensors[..i].iter().any(|s| s.id == sensor.id) {
                return Err(ReservoirError::Config(format!(
                    "duplicate sensor id {}",
                    sensor.id
                )));
            }
        }
        Ok(())
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReservoirError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ReservoirError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a config file, returning the sample fleet on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::sample()
        })
    }

    /// Save the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReservoirError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ReservoirError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            ReservoirError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

// ==================== Channel Config ====================

/// Sensor -> worker channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Maximum buffered readings
    pub capacity: usize,

    /// How long a sensor waits for capacity before dropping a reading
    pub push_timeout_ms: u64,

    /// How long a worker waits for a reading before re-checking shutdown
    pub pop_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            push_timeout_ms: DEFAULT_CHANNEL_TIMEOUT_MS,
            pop_timeout_ms: DEFAULT_CHANNEL_TIMEOUT_MS,
        }
    }
}

impl ChannelConfig {
    /// Push timeout as a `Duration`
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    /// Pop timeout as a `Duration`
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

// ==================== Worker Config ====================

/// Thread counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Threads draining the channel
    pub pipeline_workers: usize,

    /// Threads in the shared worker pool (alerts, background jobs)
    pub pool_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pipeline_workers: 1,
            pool_threads: 4,
        }
    }
}

// ==================== Alert Config ====================

/// Alerting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Values strictly above this raise a high-value alert; `None` disables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Raise an alert for readings with Error status
    #[serde(default = "default_true")]
    pub sensor_faults: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: Some(DEFAULT_ALERT_THRESHOLD),
            sensor_faults: true,
        }
    }
}

// ==================== Processing Config ====================

/// Parameters for batch cleaning/outlier filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Lowest value kept by cleaning
    pub min_valid: f64,

    /// Highest value kept by cleaning
    pub max_valid: f64,

    /// Outlier cut-off in standard deviations
    pub outlier_threshold: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_valid: 0.0,
            max_valid: 100.0,
            outlier_threshold: 2.0,
        }
    }
}

// ==================== Storage Config ====================

/// Storage sink connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Host name
    pub host: String,

    /// Port
    pub port: u16,

    /// TTL of the `latest:<sensor>` cache entries
    pub cache_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl StorageConfig {
    /// Cache TTL as a `Duration`
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

// ==================== Tests ====================
