//! Per-sensor settings
//!
//! These types describe one simulated sensor: identity, polling interval,
//! calibration, acceptable value range and the sampling model that drives
//! it. They are plain serde structs so a whole fleet can be declared in the
//! `[[sensors]]` array of the TOML configuration file.
//!
//! # Main Types
//!
//! - [`SensorSettings`] - Everything needed to build one simulated sensor
//! - [`Calibration`] - Linear correction `(raw + offset) * scale`
//! - [`ValueRange`] - Inclusive `[min, max]` bounds
//! - [`SamplerSettings`] - Which sampling model to run and its parameters

use crate::error::{ReservoirError, Result};
use crate::sensor::sampler::Pattern;
use crate::types::SensorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between two readings of a sensor
pub const DEFAULT_SENSOR_INTERVAL_MS: u64 = 1000;

/// Linear calibration applied to every raw reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Added to the raw value before scaling
    #[serde(default)]
    pub offset: f64,
    /// Multiplies the offset-corrected value
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 1.0,
        }
    }
}

impl Calibration {
    /// Create a calibration
    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    /// Apply `(raw + offset) * scale`
    pub fn apply(&self, raw: f64) -> f64 {
        (raw + self.offset) * self.scale
    }
}

/// Inclusive value range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Create a range
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Range accepting every finite value
    pub fn unbounded() -> Self {
        Self {
            min: f64::MIN,
            max: f64::MAX,
        }
    }

    /// Default acceptable range for a sensor kind
    pub fn for_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::WaterLevel => Self::new(0.0, 200.0),
            SensorKind::Temperature => Self::new(-40.0, 80.0),
            SensorKind::GateStatus => Self::new(0.0, 100.0),
            SensorKind::WaterQuality | SensorKind::Rainfall | SensorKind::FlowRate => {
                Self::new(0.0, f64::MAX)
            }
        }
    }

    /// True if `value` is finite and inside the range
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// True if the bounds are ordered (`min < max`)
    pub fn is_valid(&self) -> bool {
        self.min < self.max
    }
}

/// Sampling model for a simulated sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SamplerSettings {
    /// Tidal water level with rain bursts
    WaterLevel { base_level: f64, variation: f64 },
    /// Daily/seasonal temperature cycle
    Temperature {
        base_temperature: f64,
        daily_variation: f64,
    },
    /// Generic waveform with optional uniform noise
    Pattern {
        #[serde(default)]
        noise: f64,
        pattern: Pattern,
    },
}

impl SamplerSettings {
    /// Default model for a sensor kind
    pub fn for_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::WaterLevel => SamplerSettings::WaterLevel {
                base_level: 50.0,
                variation: 10.0,
            },
            SensorKind::Temperature => SamplerSettings::Temperature {
                base_temperature: 20.0,
                daily_variation: 8.0,
            },
            _ => SamplerSettings::Pattern {
                noise: 0.5,
                pattern: Pattern::Sine {
                    frequency: 0.05,
                    amplitude: 5.0,
                    offset: 20.0,
                },
            },
        }
    }
}

/// Configuration for one simulated sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSettings {
    /// Unique sensor identifier (e.g. `WL001`)
    pub id: String,

    /// What the sensor measures
    pub kind: SensorKind,

    /// Installation site
    #[serde(default)]
    pub location: String,

    /// Reporting unit; defaults to the kind's unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Milliseconds between readings
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// RNG seed for reproducible simulations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Calibration parameters
    #[serde(default)]
    pub calibration: Calibration,

    /// Acceptable range; defaults to the kind's physical range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_range: Option<ValueRange>,

    /// Range considered normal operation (advisory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_range: Option<ValueRange>,

    /// Sampling model
    pub sampler: SamplerSettings,
}

fn default_interval_ms() -> u64 {
    DEFAULT_SENSOR_INTERVAL_MS
}

impl SensorSettings {
    /// Settings for a sensor of `kind` with its default model and ranges
    pub fn new(id: impl Into<String>, kind: SensorKind, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            location: location.into(),
            unit: None,
            interval_ms: DEFAULT_SENSOR_INTERVAL_MS,
            seed: None,
            calibration: Calibration::default(),
            valid_range: None,
            normal_range: None,
            sampler: SamplerSettings::for_kind(kind),
        }
    }

    /// Water level sensor, normal band 30-80 cm
    pub fn water_level(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(id, SensorKind::WaterLevel, location)
            .with_normal_range(ValueRange::new(30.0, 80.0))
    }

    /// Temperature sensor, normal band 15-35 °C
    pub fn temperature(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(id, SensorKind::Temperature, location)
            .with_normal_range(ValueRange::new(15.0, 35.0))
    }

    /// Set the polling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the calibration
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Set the acceptable range
    pub fn with_valid_range(mut self, range: ValueRange) -> Self {
        self.valid_range = Some(range);
        self
    }

    /// Set the normal operating range
    pub fn with_normal_range(mut self, range: ValueRange) -> Self {
        self.normal_range = Some(range);
        self
    }

    /// Set the sampling model
    pub fn with_sampler(mut self, sampler: SamplerSettings) -> Self {
        self.sampler = sampler;
        self
    }

    /// Polling interval as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Configured unit, or the kind's default
    pub fn unit(&self) -> String {
        self.unit
            .clone()
            .unwrap_or_else(|| self.kind.default_unit().to_string())
    }

    /// Configured valid range, or the kind's default
    pub fn valid_range(&self) -> ValueRange {
        self.valid_range
            .unwrap_or_else(|| ValueRange::for_kind(self.kind))
    }

    /// Check the settings for values that can never work
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ReservoirError::Config("sensor id must not be empty".to_string()));
        }
        if self.interval_ms == 0 {
            return Err(ReservoirError::Config(format!(
                "sensor {}: interval_ms must be greater than zero",
                self.id
            )));
        }
        if !self.calibration.offset.is_finite()
            || !self.calibration.scale.is_finite()
            || self.calibration.scale == 0.0
        {
            return Err(ReservoirError::Config(format!(
                "sensor {}: calibration must be finite with a non-zero scale",
                self.id
            )));
        }
        if !self.valid_range().is_valid() {
            return Err(ReservoirError::Config(format!(
                "sensor {}: valid_range min must be below max",
                self.id
            )));
        }
        if let Some(normal) = self.normal_range {
            if !normal.is_valid() {
                return Err(ReservoirError::Config(format!(
                    "sensor {}: normal_range min must be below max",
                    self.id
                )));
            }
        }
        if let SamplerSettings::Pattern { noise, pattern } = &self.sampler {
            if !noise.is_finite() || *noise < 0.0 {
                return Err(ReservoirError::Config(format!(
                    "sensor {}: noise must be a non-negative number",
                    self.id
                )));
            }
            pattern
                .validate()
                .map_err(|e| ReservoirError::Config(format!("sensor {}: {}", self.id, e)))?;
        }
        Ok(())
    }
}
