//! Storage sinks for processed readings
//!
//! [`StorageSink`] is the seam between the pipeline and wherever readings
//! end up. Implementations must be safe to call from several worker threads
//! at once. Besides the record log a sink offers a small key/value cache
//! with optional expiry, used for the `latest:<sensor_id>` values and for
//! aggregate summaries.
//!
//! [`MemoryStore`] keeps everything in process and is what the demo and the
//! tests use.

pub mod memory;

pub use memory::MemoryStore;

use crate::analysis::AggregatedResult;
use crate::error::Result;
use crate::types::SensorRecord;
use std::time::Duration;

/// Cache key holding the most recent value of a sensor
pub fn latest_key(sensor_id: &str) -> String {
    format!("latest:{}", sensor_id)
}

/// Cache key holding the summary of an aggregate
pub fn summary_key(key: &str) -> String {
    format!("summary:{}", key)
}

/// Connection state of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// Destination for readings and derived data
#[cfg_attr(test, mockall::automock)]
pub trait StorageSink: Send + Sync {
    /// Persist one reading
    fn store(&self, record: &SensorRecord) -> Result<()>;

    /// Up to `count` most recent readings of a sensor, newest first
    fn recent(&self, sensor_id: &str, count: usize) -> Result<Vec<SensorRecord>>;

    /// Distinct ids of the sensors with stored readings, sorted
    fn sensor_ids(&self) -> Result<Vec<String>>;

    /// Persist several readings; returns how many were stored
    ///
    /// The default stores one by one. A failed record is logged and
    /// skipped, the rest of the batch is still attempted.
    fn store_batch(&self, records: &[SensorRecord]) -> Result<usize> {
        let mut stored = 0;
        for record in records {
            match self.store(record) {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!("Batch store of {} failed: {}", record.sensor_id, e),
            }
        }
        Ok(stored)
    }

    /// Persist an aggregate under `key`
    fn store_aggregate(&self, key: &str, result: &AggregatedResult) -> Result<()>;

    /// Set a cache entry, expiring after `ttl` if given
    fn set_cache(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Read a cache entry; `None` if absent or expired
    fn get_cache(&self, key: &str) -> Result<Option<String>>;

    /// Remove a cache entry; returns whether it existed
    fn delete_cache(&self, key: &str) -> Result<bool>;
}
