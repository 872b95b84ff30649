//! Integration tests for the pipeline lifecycle
//!
//! These tests validate the complete sensor-to-storage workflow:
//! - Start, run and ordered shutdown
//! - Error accounting when storage fails
//! - Alert delivery through the worker pool and the message bus
//! - Aggregation over stored readings

mod common;

use common::builders::{RecordBuilder, SensorBuilder};
use common::mock_helpers::FlakySink;
use common::wait_until;
use reservoir_rs::config::SensorSettings;
use reservoir_rs::pipeline::{AlertKind, PipelineState};
use reservoir_rs::{
    Alert, MemoryStore, Pipeline, PipelineConfig, ReservoirError, SensorStatus, StorageSink,
    Topic,
};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Config with fast channel timeouts and no sensors
fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::new();
    config.channel.capacity = 64;
    config.channel.push_timeout_ms = 50;
    config.channel.pop_timeout_ms = 10;
    config.workers.pipeline_workers = 2;
    config.workers.pool_threads = 2;
    config
}

fn fast_sensor_config() -> PipelineConfig {
    let mut config = fast_config();
    config.add_sensor(
        SensorSettings::water_level("WL001", "Main reservoir dam")
            .with_interval(Duration::from_millis(5))
            .with_seed(7),
    );
    config.add_sensor(
        SensorSettings::temperature("TEMP001", "Inlet")
            .with_interval(Duration::from_millis(5))
            .with_seed(11),
    );
    config
}

#[test]
#[serial]
fn test_end_to_end_accounts_for_every_reading() {
    let pipeline = Pipeline::from_config(fast_sensor_config()).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Created);

    pipeline.start().unwrap();
    assert!(pipeline.is_running());
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.simulator_stats().active_sensors == 2 && pipeline.stats().total_processed >= 20
    }));

    let start = Instant::now();
    pipeline.stop();
    assert!(start.elapsed() < Duration::from_secs(2), "stop should join promptly");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(!pipeline.is_running());

    let sensors = pipeline.simulator_stats();
    let stats = pipeline.stats();
    assert_eq!(sensors.active_sensors, 0);
    assert_eq!(stats.current_queue_depth, 0);
    assert_eq!(stats.total_processed + stats.total_errors, sensors.generated);

    let ids = pipeline.storage().sensor_ids().unwrap();
    assert_eq!(ids, vec!["TEMP001".to_string(), "WL001".to_string()]);
    assert!(pipeline.storage().get_cache("latest:WL001").unwrap().is_some());
}

#[test]
#[serial]
fn test_storage_failures_are_counted() {
    let sink = Arc::new(FlakySink::new(3));
    let pipeline = Pipeline::new(fast_config(), sink.clone()).unwrap();
    pipeline.start().unwrap();

    for i in 0..30 {
        pipeline
            .submit(RecordBuilder::new("WL001").value(i as f64).build())
            .unwrap();
    }
    pipeline.stop();

    let stats = pipeline.stats();
    assert_eq!(stats.total_processed, 20);
    assert_eq!(stats.total_errors, 10);
    assert_eq!(sink.failures(), 10);
    assert_eq!(sink.inner().len(), 20);
}

#[test]
#[serial]
fn test_alerts_reach_the_sink() {
    let received: Arc<Mutex<Vec<Alert>>> = Arc::new(Mutex::new(Vec::new()));
    let collector = received.clone();
    let pipeline = Pipeline::from_config(fast_config())
        .unwrap()
        .with_alert_sink(Arc::new(move |alert: &Alert| {
            collector.lock().unwrap().push(alert.clone());
        }));
    pipeline.start().unwrap();

    pipeline.submit(RecordBuilder::new("WL001").value(95.0).build()).unwrap();
    pipeline.submit(RecordBuilder::new("WL001").value(50.0).build()).unwrap();
    pipeline.submit(RecordBuilder::new("WL002").value(120.0).build()).unwrap();
    pipeline.submit(
        RecordBuilder::new("WL003")
            .value(0.0)
            .status(SensorStatus::Error)
            .build(),
        )
        .unwrap();
    pipeline.stop();

    let alerts = received.lock().unwrap();
    assert_eq!(alerts.len(), 3);
    assert_eq!(pipeline.alerts_raised(), 3);

    let high: Vec<_> = alerts
        .iter()
        .filter(|a| a.kind == AlertKind::HighValue)
        .map(|a| a.sensor_id.as_str())
        .collect();
    assert_eq!(high.len(), 2);
    assert!(high.contains(&"WL001") && high.contains(&"WL002"));
    assert!(alerts
        .iter()
        .any(|a| a.kind == AlertKind::SensorFault && a.sensor_id == "WL003"));
}

#[test]
#[serial]
fn test_alerts_fan_out_to_every_topic_subscriber() {
    let pipeline = Pipeline::from_config(fast_config()).unwrap();
    let dashboards: Vec<Arc<Mutex<Vec<String>>>> =
        (0..2).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    for seen in &dashboards {
        let seen = seen.clone();
        pipeline
            .bus()
            .subscribe(Topic::AlertHighWater, move |m| {
                seen.lock().unwrap().push(m.sender_id.clone())
            });
    }
    pipeline.start().unwrap();

    pipeline.submit(RecordBuilder::new("WL001").value(97.0).build()).unwrap();
    pipeline.submit(RecordBuilder::new("WL002").value(40.0).build()).unwrap();
    pipeline.stop();

    for seen in &dashboards {
        assert_eq!(*seen.lock().unwrap(), vec!["WL001".to_string()]);
    }
    let stats = pipeline.bus().stats();
    assert_eq!(stats.published, stats.consumed);
    assert_eq!(stats.handler_failures, 0);
}

#[test]
#[serial]
fn test_aggregate_all_after_run() {
    let store = Arc::new(MemoryStore::connected());
    let pipeline = Pipeline::new(fast_config(), store.clone()).unwrap();
    pipeline.start().unwrap();

    for value in [10.0, 20.0, 30.0] {
        pipeline.submit(RecordBuilder::new("WL001").value(value).build()).unwrap();
    }
    pipeline.stop();

    let results = pipeline.aggregate_all().unwrap();
    assert_eq!(results.len(), 1);
    let (sensor_id, result) = &results[0];
    assert_eq!(sensor_id, "WL001");
    assert_eq!(result.count, 3);
    common::assert_float_eq(result.average, 20.0, 1e-9);
    common::assert_float_eq(result.standard_deviation, 8.1650, 1e-3);

    assert_eq!(store.aggregate("WL001"), Some(result.clone()));
    assert!(store.get_cache("summary:WL001").unwrap().is_some());

    let recent = pipeline.aggregate_recent("WL001", 2).unwrap();
    assert_eq!(recent.count, 2);
    common::assert_float_eq(recent.average, 25.0, 1e-9);
}

#[test]
#[serial]
fn test_sensor_added_while_running_starts_immediately() {
    let store = Arc::new(MemoryStore::connected());
    let pipeline = Pipeline::new(fast_config(), store.clone()).unwrap();
    pipeline.start().unwrap();

    let sensor = SensorBuilder::new("WL010").value(42.0).build();
    pipeline
        .add_sensor(Box::new(sensor), Duration::from_millis(5))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !store.recent("WL010", 1).unwrap_or_default().is_empty()
    }));
    pipeline.stop();

    let latest = store.recent("WL010", 1).unwrap();
    assert_eq!(latest[0].value, 42.0);
    assert_eq!(latest[0].status, SensorStatus::Online);
}

#[test]
fn test_lifecycle_misuse_is_rejected() {
    let pipeline = Pipeline::from_config(fast_config()).unwrap();
    assert!(matches!(
        pipeline.submit(RecordBuilder::new("WL001").build()),
        Err(ReservoirError::InvalidState(_))
    ));

    pipeline.start().unwrap();
    assert!(matches!(
        pipeline.start(),
        Err(ReservoirError::InvalidState(_))
    ));

    pipeline.stop();
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.submit(RecordBuilder::new("WL001").build()).is_err());
    assert!(pipeline.start().is_err());

    let sensor = SensorBuilder::new("WL009").build();
    assert!(pipeline
        .add_sensor(Box::new(sensor), Duration::from_millis(5))
        .is_err());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = fast_config();
    config.add_sensor(SensorSettings::water_level("WL001", "Dam"));
    config.add_sensor(SensorSettings::water_level("WL001", "Dam again"));

    assert!(Pipeline::from_config(config).is_err());
}
