//! Test data builders for creating test objects

use reservoir_rs::config::ValueRange;
use reservoir_rs::{SensorKind, SensorRecord, SensorStatus, SimulatedSensor};

/// Builder for creating test SensorRecords
pub struct RecordBuilder {
    sensor_id: String,
    kind: SensorKind,
    value: f64,
    status: SensorStatus,
    location: String,
}

impl RecordBuilder {
    pub fn new(sensor_id: &str) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            kind: SensorKind::WaterLevel,
            value: 50.0,
            status: SensorStatus::Online,
            location: "Test reservoir".to_string(),
        }
    }

    pub fn kind(mut self, kind: SensorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn status(mut self, status: SensorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn build(self) -> SensorRecord {
        SensorRecord::new(self.sensor_id, self.kind, self.value)
            .with_status(self.status)
            .with_location(self.location)
    }
}

/// Builder for SimulatedSensors that replay a fixed list of raw values
pub struct SensorBuilder {
    id: String,
    kind: SensorKind,
    values: Vec<f64>,
    valid_range: Option<ValueRange>,
}

impl SensorBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: SensorKind::WaterLevel,
            values: vec![50.0],
            valid_range: None,
        }
    }

    pub fn kind(mut self, kind: SensorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Constant reading
    pub fn value(mut self, value: f64) -> Self {
        self.values = vec![value];
        self
    }

    /// Readings cycled in order
    pub fn sequence(mut self, values: &[f64]) -> Self {
        assert!(!values.is_empty(), "sequence needs at least one value");
        self.values = values.to_vec();
        self
    }

    pub fn valid_range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some(ValueRange::new(min, max));
        self
    }

    pub fn build(self) -> SimulatedSensor {
        let values = self.values;
        let mut next = 0;
        let sampler = move || {
            let value = values[next % values.len()];
            next += 1;
            value
        };
        let sensor = SimulatedSensor::new(self.id, self.kind, "Test reservoir", sampler);
        match self.valid_range {
            Some(range) => sensor.with_valid_range(range),
            None => sensor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reservoir_rs::Sensor;

    #[test]
    fn test_record_builder() {
        let record = RecordBuilder::new("TEMP001")
            .kind(SensorKind::Temperature)
            .value(21.5)
            .status(SensorStatus::Maintenance)
            .location("Inlet")
            .build();

        assert_eq!(record.sensor_id, "TEMP001");
        assert_eq!(record.kind, SensorKind::Temperature);
        assert_eq!(record.value, 21.5);
        assert_eq!(record.status, SensorStatus::Maintenance);
        assert_eq!(record.location, "Inlet");
    }

    #[test]
    fn test_sensor_builder_cycles_values() {
        let mut sensor = SensorBuilder::new("WL001").sequence(&[1.0, 2.0]).build();
        sensor.initialize().unwrap();

        let values: Vec<_> = (0..4).map(|_| sensor.read().value).collect();
        assert_eq!(values, vec![1.0, 2.0, 1.0, 2.0]);
    }
}
