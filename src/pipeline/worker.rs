//! Pipeline worker loop
//!
//! A [`PipelineWorker`] drains the shared channel on its own thread. Each
//! record is validated, stored, mirrored into the `latest:<sensor_id>` cache
//! entry and checked against the alert rules. Failures are counted and
//! logged, never propagated: a record that cannot be stored is dropped.

use super::alert::{AlertDispatcher, LogAlertSink};
use crate::channel::BoundedChannel;
use crate::error::{ReservoirError, Result, ResultExt};
use crate::storage::{latest_key, StorageSink};
use crate::types::{ProcessingStats, SensorRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default time a worker waits for a record before re-checking the channel
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Default TTL of the latest-value cache entries
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Counters shared by every worker of a pipeline
#[derive(Debug, Default)]
pub struct PipelineCounters {
    processed: AtomicU64,
    errors: AtomicU64,
    latency_us: AtomicU64,
    alerts: AtomicU64,
}

impl PipelineCounters {
    /// Records stored successfully
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Records rejected by validation or storage
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Alerts raised
    pub fn alerts(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }

    /// Snapshot the counters together with the current queue depth
    pub fn snapshot(&self, queue_depth: usize) -> ProcessingStats {
        let processed = self.processed();
        let latency_us = self.latency_us.load(Ordering::Relaxed);
        let average_latency_ms = if processed == 0 {
            0.0
        } else {
            latency_us as f64 / processed as f64 / 1000.0
        };

        ProcessingStats {
            total_processed: processed,
            total_errors: self.errors(),
            current_queue_depth: queue_depth,
            average_latency_ms,
        }
    }
}

/// Consumer draining the record channel into a storage sink
pub struct PipelineWorker {
    id: usize,
    channel: Arc<BoundedChannel<SensorRecord>>,
    storage: Arc<dyn StorageSink>,
    counters: Arc<PipelineCounters>,
    alerts: AlertDispatcher,
    pop_timeout: Duration,
    cache_ttl: Duration,
}

impl PipelineWorker {
    /// Create a worker; alerts go to the log until [`with_alerts`](Self::with_alerts)
    pub fn new(
        id: usize,
        channel: Arc<BoundedChannel<SensorRecord>>,
        storage: Arc<dyn StorageSink>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            id,
            channel,
            storage,
            counters,
            alerts: AlertDispatcher::new(None, Arc::new(LogAlertSink)),
            pop_timeout: DEFAULT_POP_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Use `alerts` for alert checks
    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = alerts;
        self
    }

    /// Set how long a pop waits before re-checking the channel
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Set the TTL of the latest-value cache entries
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Run until the channel is closed and drained
    ///
    /// An open channel keeps the worker alive even when it is empty, so the
    /// owner must close the channel to stop it. Anything pushed before the
    /// close is processed.
    pub fn run(&self) {
        tracing::info!("Pipeline worker {} started", self.id);

        loop {
            match self.channel.pop(self.pop_timeout) {
                Some(record) => {
                    let _ = self.process(record);
                }
                None if self.channel.is_drained() => break,
                None => {}
            }
        }

        tracing::info!("Pipeline worker {} stopped", self.id);
    }

    /// Process a single record, updating the counters
    ///
    /// The error is returned for the caller's information only; it has
    /// already been counted and logged.
    pub fn process(&self, record: SensorRecord) -> Result<()> {
        let started = Instant::now();

        match self.handle(&record) {
            Ok(()) => {
                let elapsed_us = started.elapsed().as_micros() as u64;
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                self.counters.latency_us.fetch_add(elapsed_us, Ordering::Relaxed);
                tracing::debug!(
                    "Worker {} stored {} = {:.2}{}",
                    self.id,
                    record.sensor_id,
                    record.value,
                    record.unit
                );
                Ok(())
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Worker {} dropped a record: {}", self.id, e);
                Err(e)
            }
        }
    }

    fn handle(&self, record: &SensorRecord) -> Result<()> {
        if !record.is_finite() {
            return Err(ReservoirError::Validation(format!(
                "{} reported a non-finite value ({})",
                record.sensor_id, record.value
            )));
        }

        self.storage
            .store(record)
            .with_context(|| format!("Failed to store reading from {}", record.sensor_id))?;

        let latest = format!("{:.2}", record.value);
        if let Err(e) =
            self.storage
                .set_cache(&latest_key(&record.sensor_id), &latest, Some(self.cache_ttl))
        {
            tracing::debug!("Could not update latest value of {}: {}", record.sensor_id, e);
        }

        let raised = self.alerts.dispatch(record);
        if raised > 0 {
            self.counters.alerts.fetch_add(raised as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PipelineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineWorker")
            .field("id", &self.id)
            .field("pop_timeout", &self.pop_timeout)
            .field("alerts", &self.alerts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::alert::Alert;
    use crate::storage::{MemoryStore, MockStorageSink};
    use crate::types::{SensorKind, SensorStatus};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Harness {
        channel: Arc<BoundedChannel<SensorRecord>>,
        counters: Arc<PipelineCounters>,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            Self {
                channel: Arc::new(BoundedChannel::new(capacity)),
                counters: Arc::new(PipelineCounters::default()),
            }
        }

        fn worker(&self, storage: Arc<dyn StorageSink>) -> PipelineWorker {
            PipelineWorker::new(
                0,
                self.channel.clone(),
                storage,
                self.counters.clone(),
            )
            .with_pop_timeout(Duration::from_millis(10))
        }
    }

    fn reading(value: f64) -> SensorRecord {
        SensorRecord::new("WL001", SensorKind::WaterLevel, value)
    }

    #[test]
    fn test_valid_and_nan_records_are_counted() {
        let harness = Harness::new(200);
        let store = Arc::new(MemoryStore::connected());

        for i in 0..100 {
            harness.channel.try_push(reading(i as f64 % 80.0)).unwrap();
        }
        for _ in 0..5 {
            harness.channel.try_push(reading(f64::NAN)).unwrap();
        }
        harness.channel.close();

        harness.worker(store.clone()).run();

        let stats = harness.counters.snapshot(harness.channel.len());
        assert_eq!(stats.total_processed, 100);
        assert_eq!(stats.total_errors, 5);
        assert_eq!(stats.current_queue_depth, 0);
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn test_infinite_values_are_rejected() {
        let harness = Harness::new(4);
        let worker = harness.worker(Arc::new(MemoryStore::connected()));
        assert!(matches!(
            worker.process(reading(f64::INFINITY)),
            Err(ReservoirError::Validation(_))
        ));
        assert_eq!(harness.counters.errors(), 1);
    }

    #[test]
    fn test_storage_failure_drops_record() {
        let mut mock = MockStorageSink::new();
        mock.expect_store()
            .times(3)
            .returning(|_| Err(ReservoirError::Storage("connection reset".to_string())));
        mock.expect_set_cache().never();

        let harness = Harness::new(4);
        let worker = harness.worker(Arc::new(mock));
        for _ in 0..3 {
            let err = worker.process(reading(50.0)).unwrap_err();
            assert!(err.to_string().contains("Failed to store reading from WL001"));
        }

        assert_eq!(harness.counters.processed(), 0);
        assert_eq!(harness.counters.errors(), 3);
    }

    #[test]
    fn test_latest_value_is_cached_with_ttl() {
        let mut mock = MockStorageSink::new();
        mock.expect_store().times(1).returning(|_| Ok(()));
        mock.expect_set_cache()
            .withf(|key, value, ttl| {
                key.to_string() == "latest:WL001"
                    && value.to_string() == "42.50"
                    && *ttl == Some(Duration::from_secs(7))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let harness = Harness::new(4);
        let worker = harness
            .worker(Arc::new(mock))
            .with_cache_ttl(Duration::from_secs(7));
        worker.process(reading(42.5)).unwrap();
        assert_eq!(harness.counters.processed(), 1);
    }

    #[test]
    fn test_cache_failure_is_not_an_error() {
        let mut mock = MockStorageSink::new();
        mock.expect_store().returning(|_| Ok(()));
        mock.expect_set_cache()
            .returning(|_, _, _| Err(ReservoirError::Storage("cache full".to_string())));

        let harness = Harness::new(4);
        harness.worker(Arc::new(mock)).process(reading(1.0)).unwrap();
        assert_eq!(harness.counters.processed(), 1);
        assert_eq!(harness.counters.errors(), 0);
    }

    #[test]
    fn test_alerts_are_raised() {
        let raised = Arc::new(AtomicUsize::new(0));
        let sink = {
            let raised = raised.clone();
            move |_: &Alert| {
                raised.fetch_add(1, Ordering::SeqCst);
            }
        };

        let harness = Harness::new(16);
        let worker = harness
            .worker(Arc::new(MemoryStore::connected()))
            .with_alerts(AlertDispatcher::new(Some(90.0), Arc::new(sink)));

        worker.process(reading(95.0)).unwrap();
        worker.process(reading(50.0)).unwrap();
        worker.process(reading(0.0).with_status(SensorStatus::Error)).unwrap();

        assert_eq!(raised.load(Ordering::SeqCst), 2);
        assert_eq!(harness.counters.alerts(), 2);
        assert_eq!(harness.counters.processed(), 3);
    }

    #[test]
    fn test_idle_worker_waits_for_close() {
        let harness = Harness::new(4);
        let worker = harness.worker(Arc::new(MemoryStore::connected()));

        let handle = thread::spawn(move || worker.run());
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        harness.channel.close();
        handle.join().unwrap();
        assert!(harness.channel.is_drained());
    }

    #[test]
    fn test_late_record_is_processed_before_exit() {
        let harness = Harness::new(4);
        let store = Arc::new(MemoryStore::connected());
        let worker = harness.worker(store.clone());

        let handle = thread::spawn(move || worker.run());
        // Several empty pops go by before the record arrives
        thread::sleep(Duration::from_millis(50));
        assert!(harness.channel.try_push(reading(12.0)).is_ok());
        harness.channel.close();
        handle.join().unwrap();

        assert_eq!(harness.counters.processed(), 1);
        assert_eq!(harness.counters.errors(), 0);
        assert_eq!(harness.channel.len(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_average_latency() {
        let counters = PipelineCounters::default();
        assert_eq!(counters.snapshot(0).average_latency_ms, 0.0);

        counters.processed.store(4, Ordering::Relaxed);
        counters.latency_us.store(2000, Ordering::Relaxed);
        let stats = counters.snapshot(3);
        assert!((stats.average_latency_ms - 0.5).abs() < 1e-9);
        assert_eq!(stats.current_queue_depth, 3);
    }
}
