//! Summary statistics over a batch of readings
//!
//! [`StatsAggregator`] is stateless: every call recomputes count, mean,
//! minimum, maximum and the population standard deviation from scratch.
//! An empty input yields an all-zero [`AggregatedResult`].

use crate::types::SensorRecord;
use serde::{Deserialize, Serialize};

/// Statistics over a batch of values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Number of values
    pub count: usize,
    /// Arithmetic mean (0 if empty)
    pub average: f64,
    /// Smallest value (0 if empty)
    pub minimum: f64,
    /// Largest value (0 if empty)
    pub maximum: f64,
    /// Population standard deviation (0 if empty)
    pub standard_deviation: f64,
    /// One-line human readable summary
    pub summary: String,
}

impl AggregatedResult {
    /// True if no values were aggregated
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl std::fmt::Display for AggregatedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary)
    }
}

/// Computes [`AggregatedResult`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAggregator;

impl StatsAggregator {
    /// Aggregate the values of a batch of records
    pub fn aggregate(records: &[SensorRecord]) -> AggregatedResult {
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        Self::aggregate_values(&values)
    }

    /// Aggregate raw values
    pub fn aggregate_values(values: &[f64]) -> AggregatedResult {
        if values.is_empty() {
            return AggregatedResult {
                summary: "no data".to_string(),
                ..Default::default()
            };
        }

        let (minimum, maximum) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let average = mean(values);
        let standard_deviation = population_std_dev(values);

        AggregatedResult {
            count: values.len(),
            average,
            minimum,
            maximum,
            standard_deviation,
            summary: format!(
                "count={} avg={:.2} min={:.2} max={:.2} std={:.2}",
                values.len(),
                average,
                minimum,
                maximum,
                standard_deviation
            ),
        }
    }
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`), 0 for an empty slice
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorKind;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        let result = StatsAggregator::aggregate_values(&[10.0, 20.0, 30.0]);
        assert_eq!(result.count, 3);
        assert!((result.average - 20.0).abs() < 1e-9);
        assert_eq!(result.minimum, 10.0);
        assert_eq!(result.maximum, 30.0);
        assert!((result.standard_deviation - 8.1650).abs() < 1e-4);
        assert!(result.summary.contains("avg=20.00"));
    }

    #[test]
    fn test_empty_input() {
        let result = StatsAggregator::aggregate(&[]);
        assert!(result.is_empty());
        assert_eq!(result.average, 0.0);
        assert_eq!(result.minimum, 0.0);
        assert_eq!(result.maximum, 0.0);
        assert_eq!(result.standard_deviation, 0.0);
        assert_eq!(result.to_string(), "no data");
    }

    #[test]
    fn test_single_value() {
        let result = StatsAggregator::aggregate_values(&[-4.5]);
        assert_eq!(result.minimum, -4.5);
        assert_eq!(result.maximum, -4.5);
        assert_eq!(result.standard_deviation, 0.0);
    }

    #[test]
    fn test_aggregate_records() {
        let records: Vec<_> = [1.0, 2.0, 3.0, 4.0]
            .iter()
            .map(|&v| SensorRecord::new("WL001", SensorKind::WaterLevel, v))
            .collect();
        let result = StatsAggregator::aggregate(&records);
        assert_eq!(result.count, 4);
        assert!((result.average - 2.5).abs() < 1e-9);
        assert!((result.standard_deviation - 1.25f64.sqrt()).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn test_bounds_hold(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..100)) {
            let result = StatsAggregator::aggregate_values(&values);

            // Property: min <= avg <= max and the deviation is non-negative
            prop_assert_eq!(result.count, values.len());
            prop_assert!(result.minimum <= result.average + 1e-6);
            prop_assert!(result.average <= result.maximum + 1e-6);
            prop_assert!(result.standard_deviation >= 0.0);
            prop_assert!(result.standard_deviation <= (result.maximum - result.minimum) + 1e-6);
        }
    }
}
