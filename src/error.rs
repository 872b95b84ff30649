//! Error handling for the reservoir pipeline
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.

use crate::channel::PushError;
use thiserror::Error;

/// Main error type for reservoir pipeline operations
#[derive(Error, Debug)]
pub enum ReservoirError {
    /// Errors raised by a sensor (initialization, self test, sampling)
    #[error("Sensor error [{sensor_id}]: {message}")]
    Sensor { sensor_id: String, message: String },

    /// A reading failed validation (NaN, infinite, out of range)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Errors reported by a storage sink
    #[error("Storage error: {0}")]
    Storage(String),

    /// The channel was closed before the operation could complete
    #[error("Channel closed")]
    ChannelClosed,

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The worker pool no longer accepts tasks
    #[error("Worker pool is shut down")]
    PoolShutdown,

    /// A pool task failed or panicked
    #[error("Task error: {0}")]
    Task(String),

    /// An operation was called in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReservoirError>,
    },
}

impl ReservoirError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ReservoirError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a sensor error
    pub fn sensor(sensor_id: impl Into<String>, message: impl Into<String>) -> Self {
        ReservoirError::Sensor {
            sensor_id: sensor_id.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ReservoirError {
    fn from(err: serde_json::Error) -> Self {
        ReservoirError::Serialization(err.to_string())
    }
}

impl<T> From<PushError<T>> for ReservoirError {
    fn from(err: PushError<T>) -> Self {
        match err {
            PushError::Timeout(_) => {
                ReservoirError::Timeout("no channel capacity within the push timeout".to_string())
            }
            PushError::Closed(_) => ReservoirError::ChannelClosed,
        }
    }
}

/// Result type alias for reservoir pipeline operations
pub type Result<T> = std::result::Result<T, ReservoirError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
