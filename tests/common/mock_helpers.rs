//! Mock construction helpers

use reservoir_rs::analysis::AggregatedResult;
use reservoir_rs::error::{ReservoirError, Result};
use reservoir_rs::{BoundedChannel, MemoryStore, SensorRecord, StorageSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::builders::RecordBuilder;

/// Create a channel of `capacity` already holding `count` water level records
pub fn filled_channel(capacity: usize, count: usize) -> Arc<BoundedChannel<SensorRecord>> {
    let channel = Arc::new(BoundedChannel::new(capacity));
    for i in 0..count {
        let record = RecordBuilder::new("WL001").value(i as f64).build();
        if channel.try_push(record).is_err() {
            panic!("filled_channel: capacity {} < count {}", capacity, count);
        }
    }
    channel
}

/// Storage sink that fails every `fail_every`-th store and forwards the rest
/// to a connected [`MemoryStore`]
pub struct FlakySink {
    inner: MemoryStore,
    fail_every: usize,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakySink {
    pub fn new(fail_every: usize) -> Self {
        Self {
            inner: MemoryStore::connected(),
            fail_every: fail_every.max(1),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Stores that were rejected
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Backing store holding the accepted records
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl StorageSink for FlakySink {
    fn store(&self, record: &SensorRecord) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(ReservoirError::Storage(format!(
                "injected failure on call {}",
                call
            )));
        }
        self.inner.store(record)
    }

    fn recent(&self, sensor_id: &str, count: usize) -> Result<Vec<SensorRecord>> {
        self.inner.recent(sensor_id, count)
    }

    fn sensor_ids(&self) -> Result<Vec<String>> {
        self.inner.sensor_ids()
    }

    fn store_aggregate(&self, key: &str, result: &AggregatedResult) -> Result<()> {
        self.inner.store_aggregate(key, result)
    }

    fn set_cache(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.inner.set_cache(key, value, ttl)
    }

    fn get_cache(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_cache(key)
    }

    fn delete_cache(&self, key: &str) -> Result<bool> {
        self.inner.delete_cache(key)
    }
}
