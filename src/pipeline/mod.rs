//! Sensor-to-storage processing pipeline
//!
//! [`Pipeline`] owns every moving part and wires them together:
//!
//! ```text
//! [SensorSource]* ──push──► [BoundedChannel] ──pop──► [PipelineWorker]* ──► StorageSink
//!                                                             │
//!                                                             └──alerts──► WorkerPool ──► AlertSink
//!                                                                     └──────► MessageBus ──► subscribers
//! ```
//!
//! The [`MessageBus`] also carries `system.status` messages on start and
//! stop, and `system.heartbeat` messages from [`Pipeline::heartbeat`].
//!
//! # Lifecycle
//!
//! A pipeline is single-use: `Created -> start() -> Running -> stop() -> Stopped`.
//! [`Pipeline::stop`] shuts down in a fixed order so no record that made it
//! into the channel is lost:
//!
//! 1. clear the running flag and signal every source
//! 2. close the channel (later pushes fail, the backlog stays)
//! 3. join the sources
//! 4. join the workers once they have drained the channel
//! 5. shut the worker pool down, running any queued alert deliveries
//! 6. publish the final status and stop the message bus after delivering
//!    everything queued
//!
//! Nothing here is a global: the configuration, the storage sink and the
//! alert sink are all passed in.

pub mod alert;
pub mod worker;

pub use alert::{Alert, AlertDispatcher, AlertKind, AlertSink, LogAlertSink};
pub use worker::{PipelineCounters, PipelineWorker};

use crate::analysis::{AggregatedResult, DataProcessor, StatsAggregator};
use crate::channel::BoundedChannel;
use crate::config::PipelineConfig;
use crate::error::{ReservoirError, Result, ResultExt};
use crate::messaging::{MessageBus, Topic};
use crate::pool::WorkerPool;
use crate::sensor::{Sensor, SensorSimulator, SimulatedSensor};
use crate::storage::{MemoryStore, StorageSink};
use crate::types::{ProcessingStats, SensorRecord, SensorStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle state of a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Stopped,
}

/// Snapshot of the sensor fleet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Sources with a live polling thread
    pub active_sensors: usize,
    /// Readings accepted by the channel
    pub generated: u64,
    /// Readings dropped on a full or closed channel
    pub dropped: u64,
}

/// Sender id of the messages the pipeline itself publishes
pub const PIPELINE_SENDER: &str = "pipeline";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The running system: sensors, channel, workers, pool and storage
pub struct Pipeline {
    config: PipelineConfig,
    channel: Arc<BoundedChannel<SensorRecord>>,
    storage: Arc<dyn StorageSink>,
    pool: Arc<WorkerPool>,
    bus: Arc<MessageBus>,
    counters: Arc<PipelineCounters>,
    running: Arc<AtomicBool>,
    alert_sink: Arc<dyn AlertSink>,
    processor: DataProcessor,
    simulator: Mutex<SensorSimulator>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    /// Build a pipeline writing to `storage`
    ///
    /// The configuration is validated and every configured sensor is added
    /// to the fleet. Nothing runs until [`start`](Self::start).
    pub fn new(config: PipelineConfig, storage: Arc<dyn StorageSink>) -> Result<Self> {
        config.validate()?;

        let pool = WorkerPool::with_error_handler(config.workers.pool_threads, |e| {
            tracing::warn!("Background task failed: {}", e);
        })?;

        let mut simulator = SensorSimulator::new(config.channel.push_timeout());
        for settings in &config.sensors {
            let sensor = SimulatedSensor::from_settings(settings)
                .with_context(|| format!("Invalid settings for sensor {}", settings.id))?;
            simulator.add_sensor(Box::new(sensor), settings.interval());
        }

        Ok(Self {
            channel: Arc::new(BoundedChannel::new(config.channel.capacity)),
            processor: DataProcessor::new(config.processing.clone()),
            config,
            storage,
            pool: Arc::new(pool),
            bus: Arc::new(MessageBus::new()),
            counters: Arc::new(PipelineCounters::default()),
            running: Arc::new(AtomicBool::new(false)),
            alert_sink: Arc::new(LogAlertSink),
            simulator: Mutex::new(simulator),
            workers: Mutex::new(Vec::new()),
            state: Mutex::new(PipelineState::Created),
        })
    }

    /// Build a pipeline backed by a [`MemoryStore`] connected to the
    /// configured host
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let store = MemoryStore::new();
        store.connect(&config.storage.host, config.storage.port);
        Self::new(config, Arc::new(store))
    }

    /// Deliver alerts to `sink` instead of the log
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = sink;
        self
    }

    /// Add a sensor polled every `interval`
    ///
    /// On a running pipeline the sensor starts immediately.
    pub fn add_sensor(&self, sensor: Box<dyn Sensor>, interval: Duration) -> Result<()> {
        let state = *lock(&self.state);
        let mut simulator = lock(&self.simulator);
        match state {
            PipelineState::Created => {
                simulator.add_sensor(sensor, interval);
                Ok(())
            }
            PipelineState::Running => {
                simulator.add_sensor(sensor, interval);
                simulator.start(self.channel.clone())?;
                Ok(())
            }
            PipelineState::Stopped => Err(ReservoirError::InvalidState(
                "cannot add a sensor to a stopped pipeline".to_string(),
            )),
        }
    }

    /// Spawn the workers and start every sensor
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if *state != PipelineState::Created {
            return Err(ReservoirError::InvalidState(format!(
                "pipeline cannot be started from {:?}",
                *state
            )));
        }

        self.bus.start()?;
        self.running.store(true, Ordering::SeqCst);

        let dispatcher = AlertDispatcher::new(self.config.alerts.threshold, self.alert_sink.clone())
            .with_sensor_faults(self.config.alerts.sensor_faults)
            .with_pool(self.pool.clone())
            .with_bus(self.bus.clone());

        {
            let mut workers = lock(&self.workers);
            for id in 0..self.config.workers.pipeline_workers {
                let worker = PipelineWorker::new(
                    id,
                    self.channel.clone(),
                    self.storage.clone(),
                    self.counters.clone(),
                )
                .with_alerts(dispatcher.clone())
                .with_pop_timeout(self.config.channel.pop_timeout())
                .with_cache_ttl(self.config.storage.cache_ttl());

                let spawned = thread::Builder::new()
                    .name(format!("pipeline-worker-{}", id))
                    .spawn(move || worker.run());
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        drop(workers);
                        *state = PipelineState::Running;
                        drop(state);
                        self.stop();
                        return Err(ReservoirError::Io(e));
                    }
                }
            }
        }

        *state = PipelineState::Running;
        drop(state);

        let started = lock(&self.simulator).start(self.channel.clone());
        let started = match started {
            Ok(started) => started,
            Err(e) => {
                self.stop();
                return Err(e);
            }
        };

        let status = format!(
            "Pipeline started: {} workers, {} sensors, channel capacity {}",
            self.config.workers.pipeline_workers,
            started,
            self.channel.capacity()
        );
        tracing::info!("{}", status);
        self.bus.publish(Topic::SystemStatus, status, PIPELINE_SENDER);
        Ok(())
    }

    /// Push a record into the channel as if a sensor had produced it
    ///
    /// Fails with `InvalidState` if the pipeline is not running, `Timeout`
    /// if the channel stayed full for the push timeout and `ChannelClosed`
    /// once shutdown has begun.
    pub fn submit(&self, record: SensorRecord) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ReservoirError::InvalidState(
                "pipeline is not running".to_string(),
            ));
        }
        self.channel
            .push(record, self.config.channel.push_timeout())
            .map_err(ReservoirError::from)
    }

    /// Stop everything, draining the channel first. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state != PipelineState::Running {
                return;
            }
            *state = PipelineState::Stopped;
        }

        tracing::info!("Stopping pipeline");

        self.running.store(false, Ordering::SeqCst);
        let mut simulator = lock(&self.simulator);
        simulator.request_stop();

        self.channel.close();
        simulator.join();
        drop(simulator);

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Pipeline worker thread panicked");
            }
        }

        self.pool.shutdown();

        let status = format!("Pipeline stopped: {}", self.stats());
        tracing::info!("{}", status);
        self.bus.publish(Topic::SystemStatus, status, PIPELINE_SENDER);
        self.bus.stop();
    }

    /// Publish the current statistics on `system.heartbeat`
    ///
    /// Returns false when the pipeline is not running.
    pub fn heartbeat(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.bus
            .publish(Topic::SystemHeartbeat, self.stats().to_string(), PIPELINE_SENDER)
    }

    /// Snapshot of the processing counters
    pub fn stats(&self) -> ProcessingStats {
        self.counters.snapshot(self.channel.len())
    }

    /// Alerts raised so far
    pub fn alerts_raised(&self) -> u64 {
        self.counters.alerts()
    }

    /// Snapshot of the sensor fleet
    pub fn simulator_stats(&self) -> SimulatorStats {
        let simulator = lock(&self.simulator);
        SimulatorStats {
            active_sensors: simulator.active_sensors(),
            generated: simulator.total_generated(),
            dropped: simulator.total_dropped(),
        }
    }

    /// Statistics over the `count` most recent good readings of a sensor
    pub fn aggregate_recent(&self, sensor_id: &str, count: usize) -> Result<AggregatedResult> {
        let recent = self
            .storage
            .recent(sensor_id, count)
            .with_context(|| format!("Failed to read recent values of {}", sensor_id))?;
        let online: Vec<_> = recent
            .into_iter()
            .filter(|r| r.status == SensorStatus::Online)
            .collect();
        Ok(StatsAggregator::aggregate(&online))
    }

    /// Clean, filter and aggregate every stored reading, per sensor
    ///
    /// Each result is persisted with [`StorageSink::store_aggregate`] under
    /// the sensor id. Results are returned sorted by sensor id.
    pub fn aggregate_all(&self) -> Result<Vec<(String, AggregatedResult)>> {
        let mut results = Vec::new();
        for sensor_id in self.storage.sensor_ids()? {
            let records = self.storage.recent(&sensor_id, usize::MAX)?;
            let result = self.processor.process(&records);
            self.storage
                .store_aggregate(&sensor_id, &result)
                .with_context(|| format!("Failed to store aggregate of {}", sensor_id))?;
            tracing::debug!("Aggregate {}: {}", sensor_id, result);
            results.push((sensor_id, result));
        }
        Ok(results)
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop)
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Configuration the pipeline was built from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Storage sink
    pub fn storage(&self) -> &Arc<dyn StorageSink> {
        &self.storage
    }

    /// Topic bus carrying alerts, status and heartbeats
    ///
    /// Subscribe before [`start`](Self::start) to see the start status.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Shared worker pool, usable for background jobs while running
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .field("pool", &self.pool)
            .field("bus", &self.bus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorSettings;
    use crate::types::SensorKind;

    fn quiet_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.channel.pop_timeout_ms = 10;
        config.workers.pool_threads = 1;
        config
    }

    #[test]
    fn test_lifecycle() {
        let pipeline = Pipeline::from_config(quiet_config()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Created);
        assert!(matches!(
            pipeline.submit(SensorRecord::new("X", SensorKind::WaterLevel, 1.0)),
            Err(ReservoirError::InvalidState(_))
        ));

        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        assert!(matches!(pipeline.start(), Err(ReservoirError::InvalidState(_))));

        pipeline.stop();
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(matches!(pipeline.start(), Err(ReservoirError::InvalidState(_))));
        assert!(!pipeline.pool().is_running());
    }

    #[test]
    fn test_submitted_records_are_drained_on_stop() {
        let pipeline = Pipeline::from_config(quiet_config()).unwrap();
        pipeline.start().unwrap();

        for i in 0..50 {
            pipeline
                .submit(SensorRecord::new("WL001", SensorKind::WaterLevel, i as f64))
                .unwrap();
        }
        pipeline
            .submit(SensorRecord::new("WL001", SensorKind::WaterLevel, f64::NAN))
            .unwrap();
        pipeline.stop();

        let stats = pipeline.stats();
        assert_eq!(stats.total_processed, 50);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.current_queue_depth, 0);
        assert!(pipeline
            .submit(SensorRecord::new("WL001", SensorKind::WaterLevel, 1.0))
            .is_err());
    }

    #[test]
    fn test_aggregates() {
        let pipeline = Pipeline::from_config(quiet_config()).unwrap();
        pipeline.start().unwrap();
        for v in [10.0, 20.0, 30.0] {
            pipeline
                .submit(SensorRecord::new("WL001", SensorKind::WaterLevel, v))
                .unwrap();
        }
        pipeline
            .submit(SensorRecord::new("TEMP001", SensorKind::Temperature, 21.0))
            .unwrap();
        pipeline.stop();

        let recent = pipeline.aggregate_recent("WL001", 10).unwrap();
        assert_eq!(recent.count, 3);
        assert!((recent.average - 20.0).abs() < 1e-9);

        let all = pipeline.aggregate_all().unwrap();
        let ids: Vec<_> = all.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["TEMP001", "WL001"]);
        assert_eq!(
            pipeline.storage().get_cache("summary:WL001").unwrap(),
            Some(all[1].1.summary.clone())
        );
    }

    #[test]
    fn test_status_and_heartbeat_are_published() {
        let pipeline = Pipeline::from_config(quiet_config()).unwrap();
        let status = Arc::new(Mutex::new(Vec::new()));
        let beats = Arc::new(Mutex::new(Vec::new()));
        for (topic, seen) in [(Topic::SystemStatus, &status), (Topic::SystemHeartbeat, &beats)] {
            let seen = seen.clone();
            pipeline
                .bus()
                .subscribe(topic, move |m| seen.lock().unwrap().push(m.content.clone()));
        }

        assert!(!pipeline.heartbeat());
        pipeline.start().unwrap();
        assert!(pipeline.heartbeat());
        pipeline.stop();
        assert!(!pipeline.heartbeat());
        assert!(!pipeline.bus().is_running());

        let status = status.lock().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[0].starts_with("Pipeline started"));
        assert!(status[1].starts_with("Pipeline stopped"));
        assert_eq!(beats.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = quiet_config();
        config.add_sensor(SensorSettings::water_level("WL001", "A"));
        config.add_sensor(SensorSettings::water_level("WL001", "B"));
        assert!(matches!(
            Pipeline::from_config(config),
            Err(ReservoirError::Config(_))
        ));
    }

    #[test]
    fn test_add_sensor_after_stop_is_rejected() {
        let pipeline = Pipeline::from_config(quiet_config()).unwrap();
        pipeline.start().unwrap();
        pipeline.stop();
        let sensor = SimulatedSensor::water_level("WL009", "Spillway", Some(1));
        assert!(pipeline
            .add_sensor(Box::new(sensor), Duration::from_millis(10))
            .is_err());
    }
}
