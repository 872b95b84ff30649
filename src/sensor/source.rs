//! Sensor polling threads
//!
//! A [`SensorSource`] owns one sensor and, once started, one OS thread that
//! reads the sensor at a fixed interval and pushes every record into the
//! shared [`BoundedChannel`]. [`SensorSimulator`] manages a fleet of sources.
//!
//! The wait between two readings is a crossbeam `select!` over a ticker and a
//! stop channel, so [`SensorSource::stop`] never waits out a long interval.
//! The sensor is moved into the thread and handed back through the
//! `JoinHandle`, which is how `stop` can shut it down afterwards.

use super::Sensor;
use crate::channel::{BoundedChannel, PushError};
use crate::error::{ReservoirError, Result};
use crate::types::{SensorRecord, SensorStatus};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default time a source waits for channel capacity before dropping a reading
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct SourceCounters {
    generated: AtomicU64,
    dropped: AtomicU64,
}

/// One sensor plus the thread polling it
pub struct SensorSource {
    sensor_id: String,
    interval: Duration,
    push_timeout: Duration,
    /// Present while the source is stopped
    sensor: Option<Box<dyn Sensor>>,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<Box<dyn Sensor>>>,
    counters: Arc<SourceCounters>,
}

impl SensorSource {
    /// Wrap a sensor polled every `interval`
    pub fn new(sensor: Box<dyn Sensor>, interval: Duration) -> Self {
        Self {
            sensor_id: sensor.sensor_id().to_string(),
            interval: interval.max(Duration::from_millis(1)),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            sensor: Some(sensor),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            handle: None,
            counters: Arc::new(SourceCounters::default()),
        }
    }

    /// Set how long a push waits for capacity
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Initialize the sensor and spawn the polling thread
    pub fn start(&mut self, channel: Arc<BoundedChannel<SensorRecord>>) -> Result<()> {
        let mut sensor = self.sensor.take().ok_or_else(|| {
            ReservoirError::InvalidState(format!("source {} is already running", self.sensor_id))
        })?;

        if let Err(e) = sensor.initialize() {
            self.sensor = Some(sensor);
            return Err(e);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.running.store(true, Ordering::SeqCst);

        let worker = SourceLoop {
            running: self.running.clone(),
            counters: self.counters.clone(),
            channel,
            stop_rx,
            interval: self.interval,
            push_timeout: self.push_timeout,
        };

        let spawned = thread::Builder::new()
            .name(format!("sensor-{}", self.sensor_id))
            .spawn(move || worker.run(sensor));

        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.handle = Some(handle);
                tracing::info!(
                    "Sensor source {} started (interval {:?})",
                    self.sensor_id,
                    self.interval
                );
                Ok(())
            }
            Err(e) => {
                // The sensor went down with the closure
                self.running.store(false, Ordering::SeqCst);
                tracing::error!("Failed to spawn thread for sensor {}: {}", self.sensor_id, e);
                Err(ReservoirError::Io(e))
            }
        }
    }

    /// Ask the polling thread to stop without waiting for it
    pub fn request_stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender wakes the select immediately
        self.stop_tx.take();
    }

    /// Wait for the polling thread and take the sensor offline
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match handle.join() {
            Ok(mut sensor) => {
                sensor.shutdown();
                self.sensor = Some(sensor);
            }
            Err(_) => {
                tracing::error!("Sensor source {} thread panicked", self.sensor_id);
            }
        }

        tracing::info!(
            "Sensor source {} stopped ({} generated, {} dropped)",
            self.sensor_id,
            self.generated(),
            self.dropped()
        );
    }

    /// Stop the polling thread, join it and shut the sensor down
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Sensor identifier
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True while the polling thread is alive and not asked to stop
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// The sensor, available while the source is stopped
    pub fn sensor(&self) -> Option<&dyn Sensor> {
        self.sensor.as_deref()
    }

    /// Sensor status; Online while the polling thread owns the sensor
    pub fn status(&self) -> SensorStatus {
        match &self.sensor {
            Some(sensor) => sensor.status(),
            None if self.is_running() => SensorStatus::Online,
            None => SensorStatus::Offline,
        }
    }

    /// Readings accepted by the channel
    pub fn generated(&self) -> u64 {
        self.counters.generated.load(Ordering::Relaxed)
    }

    /// Readings dropped because the channel stayed full or was closed
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for SensorSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SensorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSource")
            .field("sensor_id", &self.sensor_id)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .field("generated", &self.generated())
            .field("dropped", &self.dropped())
            .finish()
    }
}

struct SourceLoop {
    running: Arc<AtomicBool>,
    counters: Arc<SourceCounters>,
    channel: Arc<BoundedChannel<SensorRecord>>,
    stop_rx: Receiver<()>,
    interval: Duration,
    push_timeout: Duration,
}

impl SourceLoop {
    fn run(self, mut sensor: Box<dyn Sensor>) -> Box<dyn Sensor> {
        let ticker = tick(self.interval);

        while self.running.load(Ordering::SeqCst) {
            let record = sensor.read();
            tracing::trace!("{} read {:.2}{}", record.sensor_id, record.value, record.unit);

            match self.channel.push(record, self.push_timeout) {
                Ok(()) => {
                    self.counters.generated.fetch_add(1, Ordering::Relaxed);
                }
                Err(PushError::Timeout(record)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Channel full, dropped reading from {} after {:?}",
                        record.sensor_id,
                        self.push_timeout
                    );
                }
                Err(PushError::Closed(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Channel closed, source {} exiting", sensor.sensor_id());
                    break;
                }
            }

            select! {
                recv(self.stop_rx) -> _ => break,
                recv(ticker) -> _ => {}
            }
        }

        sensor
    }
}

/// Fleet of sensor sources feeding one channel
#[derive(Debug)]
pub struct SensorSimulator {
    sources: Vec<SensorSource>,
    push_timeout: Duration,
}

impl Default for SensorSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_TIMEOUT)
    }
}

impl SensorSimulator {
    /// Create an empty fleet whose sources wait `push_timeout` for capacity
    pub fn new(push_timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            push_timeout,
        }
    }

    /// Add a sensor polled every `interval`
    pub fn add_sensor(&mut self, sensor: Box<dyn Sensor>, interval: Duration) {
        tracing::debug!("Adding sensor {} ({:?})", sensor.sensor_id(), interval);
        self.sources
            .push(SensorSource::new(sensor, interval).with_push_timeout(self.push_timeout));
    }

    /// Start every stopped source; returns how many started
    ///
    /// A sensor that fails to initialize is logged and skipped.
    pub fn start(&mut self, channel: Arc<BoundedChannel<SensorRecord>>) -> Result<usize> {
        let mut started = 0;
        for source in self.sources.iter_mut().filter(|s| !s.is_running()) {
            match source.start(channel.clone()) {
                Ok(()) => started += 1,
                Err(ReservoirError::Io(e)) => return Err(ReservoirError::Io(e)),
                Err(e) => tracing::error!("Sensor {} failed to start: {}", source.sensor_id(), e),
            }
        }
        tracing::info!("Sensor simulator started {} of {} sources", started, self.sources.len());
        Ok(started)
    }

    /// Signal every source to stop without joining
    pub fn request_stop(&mut self) {
        for source in &mut self.sources {
            source.request_stop();
        }
    }

    /// Join every source thread
    pub fn join(&mut self) {
        for source in &mut self.sources {
            source.join();
        }
    }

    /// Stop and join every source
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Readings accepted by the channel across all sources
    pub fn total_generated(&self) -> u64 {
        self.sources.iter().map(|s| s.generated()).sum()
    }

    /// Readings dropped across all sources
    pub fn total_dropped(&self) -> u64 {
        self.sources.iter().map(|s| s.dropped()).sum()
    }

    /// Number of sources currently running
    pub fn active_sensors(&self) -> usize {
        self.sources.iter().filter(|s| s.is_running()).count()
    }

    /// Number of sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True if no source was added
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// All sources
    pub fn sources(&self) -> &[SensorSource] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SimulatedSensor;
    use crate::types::SensorKind;
    use std::time::Instant;

    fn constant(id: &str, value: f64) -> Box<dyn Sensor> {
        Box::new(SimulatedSensor::new(id, SensorKind::WaterLevel, "Test", move || value))
    }

    #[test]
    fn test_source_pushes_until_stopped() {
        let channel = Arc::new(BoundedChannel::new(100));
        let mut source = SensorSource::new(constant("WL001", 42.0), Duration::from_millis(5));
        source.start(channel.clone()).unwrap();
        assert!(source.is_running());
        assert_eq!(source.status(), SensorStatus::Online);

        thread::sleep(Duration::from_millis(60));
        source.stop();

        assert!(!source.is_running());
        assert!(source.generated() > 0);
        assert_eq!(channel.len() as u64, source.generated());
        assert_eq!(channel.try_pop().map(|r| r.value), Some(42.0));

        // The sensor is handed back and ends Offline
        assert_eq!(source.sensor().map(|s| s.status()), Some(SensorStatus::Offline));
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let channel = Arc::new(BoundedChannel::new(10));
        let mut source = SensorSource::new(constant("WL001", 1.0), Duration::from_secs(30));
        source.start(channel).unwrap();
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        source.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(source.generated(), 1);
    }

    #[test]
    fn test_full_channel_drops_readings() {
        let channel = Arc::new(BoundedChannel::new(1));
        let mut source = SensorSource::new(constant("WL001", 1.0), Duration::from_millis(1))
            .with_push_timeout(Duration::from_millis(1));
        source.start(channel.clone()).unwrap();
        thread::sleep(Duration::from_millis(50));
        source.stop();

        assert_eq!(source.generated(), 1);
        assert!(source.dropped() > 0);
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_closed_channel_ends_source() {
        let channel = Arc::new(BoundedChannel::new(10));
        channel.close();
        let mut source = SensorSource::new(constant("WL001", 1.0), Duration::from_secs(30));
        source.start(channel).unwrap();
        source.join();
        assert_eq!(source.generated(), 0);
        assert_eq!(source.dropped(), 1);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let channel = Arc::new(BoundedChannel::new(10));
        let mut source = SensorSource::new(constant("WL001", 1.0), Duration::from_millis(10));
        source.start(channel.clone()).unwrap();
        assert!(matches!(
            source.start(channel),
            Err(ReservoirError::InvalidState(_))
        ));
        source.stop();
    }

    #[test]
    fn test_simulator_fleet() {
        let channel = Arc::new(BoundedChannel::new(1000));
        let mut simulator = SensorSimulator::new(Duration::from_millis(10));
        simulator.add_sensor(constant("WL001", 10.0), Duration::from_millis(5));
        simulator.add_sensor(constant("WL002", 20.0), Duration::from_millis(5));
        simulator.add_sensor(
            Box::new(SimulatedSensor::temperature("TEMP001", "Inlet", Some(3))),
            Duration::from_millis(5),
        );
        assert_eq!(simulator.active_sensors(), 0);

        assert_eq!(simulator.start(channel.clone()).unwrap(), 3);
        assert_eq!(simulator.active_sensors(), 3);
        thread::sleep(Duration::from_millis(40));
        simulator.stop();

        assert_eq!(simulator.active_sensors(), 0);
        assert_eq!(simulator.total_dropped(), 0);
        assert_eq!(simulator.total_generated(), channel.len() as u64);
        assert!(simulator
            .sources()
            .iter()
            .all(|s| s.status() == SensorStatus::Offline));
    }
}
