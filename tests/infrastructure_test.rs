//! Test to verify test infrastructure works correctly

mod common;

use common::builders::RecordBuilder;
use common::mock_helpers::{filled_channel, FlakySink};
use reservoir_rs::{SensorKind, SensorStatus, StorageSink};

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let record = RecordBuilder::new("WL002")
        .kind(SensorKind::WaterLevel)
        .value(61.2)
        .build();

    assert_eq!(record.sensor_id, "WL002");
    assert_eq!(record.value, 61.2);
    assert_eq!(record.status, SensorStatus::Online);
    assert_eq!(record.unit, "cm");
}

#[test]
fn test_filled_channel() {
    let channel = filled_channel(8, 5);
    assert_eq!(channel.len(), 5);
    assert_eq!(channel.capacity(), 8);
}

#[test]
fn test_flaky_sink_fails_on_schedule() {
    let sink = FlakySink::new(3);
    let results: Vec<_> = (0..6)
        .map(|i| sink.store(&RecordBuilder::new("WL001").value(i as f64).build()))
        .map(|r| r.is_ok())
        .collect();

    assert_eq!(results, vec![true, true, false, true, true, false]);
    assert_eq!(sink.failures(), 2);
    assert_eq!(sink.inner().len(), 4);
}

#[test]
fn test_batch_store_keeps_going_after_a_failure() {
    let sink = FlakySink::new(3);
    let batch: Vec<_> = (0..7)
        .map(|i| RecordBuilder::new("WL001").value(i as f64).build())
        .collect();

    // Calls 3 and 6 fail, the other five are stored
    assert_eq!(sink.store_batch(&batch).unwrap(), 5);
    assert_eq!(sink.failures(), 2);

    let stored: Vec<_> = sink.inner().snapshot().iter().map(|r| r.value).collect();
    assert_eq!(stored, vec![0.0, 1.0, 3.0, 4.0, 6.0]);
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
