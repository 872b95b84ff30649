//! Core data types for the reservoir pipeline
//!
//! This module contains the data structures that flow through the system:
//! readings produced by sensors and the counters exposed by the pipeline.
//!
//! # Main Types
//!
//! - [`SensorKind`] - What a sensor measures (water level, temperature, ...)
//! - [`SensorStatus`] - Lifecycle/health state of a sensor
//! - [`SensorRecord`] - A single timestamped reading, moved by value through the channel
//! - [`ProcessingStats`] - Point-in-time snapshot of pipeline counters
//!
//! # Serialization
//!
//! Records serialize to JSON with snake_case keys and the timestamp encoded
//! as Unix milliseconds, so a record written by [`SensorRecord::to_json`]
//! can be read back with [`SensorRecord::from_json`].

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to a record (sensor model, accuracy, ...)
pub type Metadata = Map<String, Value>;

/// What a sensor measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Reservoir water level
    #[default]
    WaterLevel,
    /// Water quality index
    WaterQuality,
    /// Rainfall accumulation
    Rainfall,
    /// Sluice gate opening
    GateStatus,
    /// Flow rate through an inlet/outlet
    FlowRate,
    /// Water or air temperature
    Temperature,
}

impl SensorKind {
    /// Unit a sensor of this kind reports in unless configured otherwise
    pub fn default_unit(&self) -> &'static str {
        match self {
            SensorKind::WaterLevel => "cm",
            SensorKind::WaterQuality => "NTU",
            SensorKind::Rainfall => "mm",
            SensorKind::GateStatus => "%",
            SensorKind::FlowRate => "m3/s",
            SensorKind::Temperature => "°C",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::WaterLevel => write!(f, "water level"),
            SensorKind::WaterQuality => write!(f, "water quality"),
            SensorKind::Rainfall => write!(f, "rainfall"),
            SensorKind::GateStatus => write!(f, "gate status"),
            SensorKind::FlowRate => write!(f, "flow rate"),
            SensorKind::Temperature => write!(f, "temperature"),
        }
    }
}

/// Health/lifecycle state of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    /// Initialized and producing readings
    Online,
    /// Not initialized, or shut down
    #[default]
    Offline,
    /// A reading failed validation; readings carry a sentinel value
    Error,
    /// Taken out of service on purpose
    Maintenance,
}

impl std::fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorStatus::Online => write!(f, "Online"),
            SensorStatus::Offline => write!(f, "Offline"),
            SensorStatus::Error => write!(f, "Error"),
            SensorStatus::Maintenance => write!(f, "Maintenance"),
        }
    }
}

/// A single timestamped reading from a sensor
///
/// Records are immutable once produced: they are moved by value from the
/// producing sensor thread through the channel to a pipeline worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Identifier of the producing sensor (e.g. `WL001`)
    pub sensor_id: String,
    /// What was measured
    #[serde(rename = "type")]
    pub kind: SensorKind,
    /// Calibrated value, or `0.0` when `status` is not [`SensorStatus::Online`]
    pub value: f64,
    /// Unit of `value`
    pub unit: String,
    /// Wall-clock time the reading was taken
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Sensor status at the time of the reading
    pub status: SensorStatus,
    /// Where the sensor is installed
    pub location: String,
    /// Static sensor metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl SensorRecord {
    /// Create an online record stamped with the current time
    pub fn new(sensor_id: impl Into<String>, kind: SensorKind, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            kind,
            value,
            unit: kind.default_unit().to_string(),
            timestamp: Utc::now(),
            status: SensorStatus::Online,
            location: String::new(),
            metadata: Metadata::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: SensorStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True if the value is neither NaN nor infinite
    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a record from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Point-in-time snapshot of the pipeline counters
///
/// Counters are read without locking, so a snapshot may be slightly stale,
/// but `total_processed` and `total_errors` never go backwards between
/// snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    /// Records stored successfully
    pub total_processed: u64,
    /// Records rejected by validation or storage
    pub total_errors: u64,
    /// Records waiting in the channel
    pub current_queue_depth: usize,
    /// Mean wall-clock time spent processing a stored record
    pub average_latency_ms: f64,
}

impl ProcessingStats {
    /// Calculate the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed + self.total_errors;
        if total == 0 {
            100.0
        } else {
            (self.total_processed as f64 / total as f64) * 100.0
        }
    }
}

impl std::fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} errors={} queue={} avg_latency={:.3}ms",
            self.total_processed,
            self.total_errors,
            self.current_queue_depth,
            self.average_latency_ms
        )
    }
}
