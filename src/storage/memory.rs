//! In-process storage sink
//!
//! [`MemoryStore`] stands in for a key/value server: it has to be connected
//! before it accepts anything, keeps every record in arrival order, and
//! honours cache TTLs lazily (an expired entry is dropped when it is read).
//! All state sits behind one mutex, held only for the duration of a single
//! operation.

use super::{summary_key, ConnectionStatus, StorageSink};
use crate::analysis::AggregatedResult;
use crate::error::{ReservoirError, Result};
use crate::types::SensorRecord;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    status: ConnectionStatus,
    endpoint: Option<(String, u16)>,
    records: Vec<SensorRecord>,
    cache: HashMap<String, CacheEntry>,
    aggregates: HashMap<String, AggregatedResult>,
}

impl StoreState {
    fn ensure_connected(&self) -> Result<()> {
        match self.status {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Disconnected => {
                Err(ReservoirError::Storage("store is not connected".to_string()))
            }
        }
    }
}

/// Sizes of the data held by a [`MemoryStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub cache_entries: usize,
    pub aggregates: usize,
}

/// Thread-safe in-memory [`StorageSink`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create a disconnected store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already connected to `localhost:6379`
    pub fn connected() -> Self {
        let store = Self::new();
        store.connect("localhost", 6379);
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the store as connected to `host:port`
    pub fn connect(&self, host: &str, port: u16) {
        let mut state = self.lock();
        state.status = ConnectionStatus::Connected;
        state.endpoint = Some((host.to_string(), port));
        tracing::info!("Storage connected to {}:{}", host, port);
    }

    /// Mark the store as disconnected; data is kept
    pub fn disconnect(&self) {
        let mut state = self.lock();
        if state.status == ConnectionStatus::Connected {
            tracing::info!("Storage disconnected");
        }
        state.status = ConnectionStatus::Disconnected;
    }

    /// Current connection state
    pub fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    /// `host:port` of the last connect
    pub fn endpoint(&self) -> Option<String> {
        self.lock()
            .endpoint
            .as_ref()
            .map(|(host, port)| format!("{}:{}", host, port))
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// True if no record was stored
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Copy of every stored record in arrival order
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        self.lock().records.clone()
    }

    /// Aggregate stored under `key`
    pub fn aggregate(&self, key: &str) -> Option<AggregatedResult> {
        self.lock().aggregates.get(key).cloned()
    }

    /// Sizes of the stored data
    pub fn stats(&self) -> StoreStats {
        let state = self.lock();
        StoreStats {
            records: state.records.len(),
            cache_entries: state.cache.len(),
            aggregates: state.aggregates.len(),
        }
    }
}

impl StorageSink for MemoryStore {
    fn store(&self, record: &SensorRecord) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.records.push(record.clone());
        Ok(())
    }

    fn recent(&self, sensor_id: &str, count: usize) -> Result<Vec<SensorRecord>> {
        let state = self.lock();
        state.ensure_connected()?;
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| r.sensor_id == sensor_id)
            .take(count)
            .cloned()
            .collect())
    }

    fn sensor_ids(&self) -> Result<Vec<String>> {
        let state = self.lock();
        state.ensure_connected()?;
        let ids: BTreeSet<_> = state.records.iter().map(|r| r.sensor_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    fn store_batch(&self, records: &[SensorRecord]) -> Result<usize> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_connected() {
            tracing::warn!("Batch of {} readings not stored: {}", records.len(), e);
            return Ok(0);
        }
        state.records.extend_from_slice(records);
        Ok(records.len())
    }

    fn store_aggregate(&self, key: &str, result: &AggregatedResult) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.aggregates.insert(key.to_string(), result.clone());
        state.cache.insert(
            summary_key(key),
            CacheEntry {
                value: result.summary.clone(),
                expires_at: None,
            },
        );
        Ok(())
    }

    fn set_cache(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.cache.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn get_cache(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock();
        state.ensure_connected()?;

        let expired = match state.cache.get(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(Instant::now()),
        };
        if expired {
            state.cache.remove(key);
            return Ok(None);
        }
        Ok(state.cache.get(key).map(|e| e.value.clone()))
    }

    fn delete_cache(&self, key: &str) -> Result<bool> {
        let mut state = self.lock();
        state.ensure_connected()?;
        Ok(state.cache.remove(key).is_some())
    }
}
