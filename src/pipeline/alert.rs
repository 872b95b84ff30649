//! Advisory alerts raised while processing readings
//!
//! Alerts never affect the processing outcome of a record. They are handed
//! to an [`AlertSink`], off the worker thread when a [`WorkerPool`] is
//! available, and published on the alert topics of a [`MessageBus`] when
//! one is attached.

use crate::messaging::{MessageBus, Topic};
use crate::pool::WorkerPool;
use crate::types::{SensorRecord, SensorStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Why an alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Value above the configured threshold
    HighValue,
    /// Reading produced by a sensor in Error state
    SensorFault,
}

impl AlertKind {
    /// Bus topic alerts of this kind are published on
    pub fn topic(&self) -> Topic {
        match self {
            AlertKind::HighValue => Topic::AlertHighWater,
            AlertKind::SensorFault => Topic::AlertDeviceFault,
        }
    }
}

/// A single alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub sensor_id: String,
    pub location: String,
    pub value: f64,
    pub unit: String,
    /// Threshold that was crossed, for [`AlertKind::HighValue`]
    pub threshold: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// High value alert for `record`
    pub fn high_value(record: &SensorRecord, threshold: f64) -> Self {
        Self::from_record(AlertKind::HighValue, record, Some(threshold))
    }

    /// Sensor fault alert for `record`
    pub fn sensor_fault(record: &SensorRecord) -> Self {
        Self::from_record(AlertKind::SensorFault, record, None)
    }

    fn from_record(kind: AlertKind, record: &SensorRecord, threshold: Option<f64>) -> Self {
        Self {
            kind,
            sensor_id: record.sensor_id.clone(),
            location: record.location.clone(),
            value: record.value,
            unit: record.unit.clone(),
            threshold,
            timestamp: record.timestamp,
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AlertKind::HighValue => write!(
                f,
                "high value at {} ({}): {:.2}{} > {:.2}",
                self.sensor_id,
                self.location,
                self.value,
                self.unit,
                self.threshold.unwrap_or(f64::NAN)
            ),
            AlertKind::SensorFault => {
                write!(f, "sensor fault at {} ({})", self.sensor_id, self.location)
            }
        }
    }
}

/// Receiver of alerts
///
/// Any `Fn(&Alert) + Send + Sync` closure is a sink.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &Alert);
}

impl<F> AlertSink for F
where
    F: Fn(&Alert) + Send + Sync,
{
    fn notify(&self, alert: &Alert) {
        self(alert)
    }
}

/// Sink writing alerts to the log at warn level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, alert: &Alert) {
        tracing::warn!("ALERT {}", alert);
    }
}

/// Checks records against the alert rules and delivers the alerts
#[derive(Clone)]
pub struct AlertDispatcher {
    threshold: Option<f64>,
    sensor_faults: bool,
    sink: Arc<dyn AlertSink>,
    pool: Option<Arc<WorkerPool>>,
    bus: Option<Arc<MessageBus>>,
}

impl AlertDispatcher {
    /// Create a dispatcher delivering inline on the calling thread
    pub fn new(threshold: Option<f64>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            threshold,
            sensor_faults: true,
            sink,
            pool: None,
            bus: None,
        }
    }

    /// Deliver through `pool` instead of inline
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Also publish every alert on `bus`
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Enable or disable sensor fault alerts
    pub fn with_sensor_faults(mut self, enabled: bool) -> Self {
        self.sensor_faults = enabled;
        self
    }

    /// Alerts `record` should raise
    pub fn check(&self, record: &SensorRecord) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if self.sensor_faults && record.status == SensorStatus::Error {
            alerts.push(Alert::sensor_fault(record));
        }
        if let Some(threshold) = self.threshold {
            if record.status == SensorStatus::Online && record.value > threshold {
                alerts.push(Alert::high_value(record, threshold));
            }
        }
        alerts
    }

    /// Check `record` and deliver its alerts; returns how many were raised
    pub fn dispatch(&self, record: &SensorRecord) -> usize {
        let alerts = self.check(record);
        for alert in &alerts {
            self.deliver(alert.clone());
        }
        alerts.len()
    }

    fn deliver(&self, alert: Alert) {
        if let Some(bus) = &self.bus {
            if !bus.publish(alert.kind.topic(), alert.to_string(), alert.sensor_id.clone()) {
                tracing::debug!("Message bus is stopped, alert not published");
            }
        }

        let Some(pool) = &self.pool else {
            self.sink.notify(&alert);
            return;
        };

        let sink = self.sink.clone();
        let pending = alert.clone();
        if pool.execute(move || sink.notify(&pending)).is_err() {
            tracing::debug!("Worker pool is shut down, delivering alert inline");
            self.sink.notify(&alert);
        }
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("threshold", &self.threshold)
            .field("sensor_faults", &self.sensor_faults)
            .field("pooled", &self.pool.is_some())
            .field("bus", &self.bus.is_some())
            .finish()
    }
}
