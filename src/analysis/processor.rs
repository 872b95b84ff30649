//! Batch cleaning and outlier filtering
//!
//! [`DataProcessor`] runs a three-step pass over stored readings:
//!
//! 1. **clean** drops readings that are non-finite, outside
//!    `[min_valid, max_valid]`, or not taken while the sensor was Online
//! 2. **filter** drops outliers, i.e. values further than
//!    `outlier_threshold` population standard deviations from the mean
//! 3. **aggregate** summarizes what is left with [`StatsAggregator`]
//!
//! Each step returns a [`ProcessedData`] tagged with the step that produced
//! it and an info line describing what was removed.

use super::stats::{mean, population_std_dev, AggregatedResult, StatsAggregator};
use crate::config::ProcessingConfig;
use crate::types::{SensorRecord, SensorStatus};
use chrono::{DateTime, Utc};

/// Stage a batch has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Raw,
    Cleaned,
    Filtered,
    Aggregated,
}

/// A batch of readings after one processing step
#[derive(Debug, Clone)]
pub struct ProcessedData {
    pub records: Vec<SensorRecord>,
    pub status: ProcessStatus,
    pub processed_at: DateTime<Utc>,
    pub info: String,
}

impl ProcessedData {
    fn new(records: Vec<SensorRecord>, status: ProcessStatus, info: String) -> Self {
        Self {
            records,
            status,
            processed_at: Utc::now(),
            info,
        }
    }

    /// Wrap readings that have not been processed yet
    pub fn raw(records: Vec<SensorRecord>) -> Self {
        let info = format!("{} raw readings", records.len());
        Self::new(records, ProcessStatus::Raw, info)
    }

    /// Values of the contained readings
    pub fn values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.value).collect()
    }
}

/// Cleans, filters and aggregates batches of readings
#[derive(Debug, Clone)]
pub struct DataProcessor {
    config: ProcessingConfig,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new(ProcessingConfig::default())
    }
}

impl DataProcessor {
    /// Create a processor
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    /// Get the current configuration
    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    fn is_valid(&self, record: &SensorRecord) -> bool {
        record.status == SensorStatus::Online
            && record.value.is_finite()
            && record.value >= self.config.min_valid
            && record.value <= self.config.max_valid
    }

    /// Drop invalid readings
    pub fn clean(&self, raw: &[SensorRecord]) -> ProcessedData {
        let cleaned: Vec<_> = raw.iter().filter(|r| self.is_valid(r)).cloned().collect();
        let info = format!("cleaned: {} raw, {} valid", raw.len(), cleaned.len());
        tracing::debug!("{}", info);
        ProcessedData::new(cleaned, ProcessStatus::Cleaned, info)
    }

    /// Drop outliers
    pub fn filter_outliers(&self, input: &ProcessedData) -> ProcessedData {
        if input.records.is_empty() {
            return ProcessedData::new(
                Vec::new(),
                ProcessStatus::Filtered,
                "nothing to filter".to_string(),
            );
        }

        let values = input.values();
        let avg = mean(&values);
        let limit = self.config.outlier_threshold * population_std_dev(&values);

        let filtered: Vec<_> = input
            .records
            .iter()
            .filter(|r| (r.value - avg).abs() <= limit)
            .cloned()
            .collect();

        let info = format!(
            "outliers filtered: {} before, {} after",
            input.records.len(),
            filtered.len()
        );
        tracing::debug!("{}", info);
        ProcessedData::new(filtered, ProcessStatus::Filtered, info)
    }

    /// Summarize a batch
    pub fn aggregate(&self, input: &ProcessedData) -> AggregatedResult {
        StatsAggregator::aggregate(&input.records)
    }

    /// Clean, filter and aggregate in one go
    pub fn process(&self, raw: &[SensorRecord]) -> AggregatedResult {
        let cleaned = self.clean(raw);
        let filtered = self.filter_outliers(&cleaned);
        self.aggregate(&filtered)
    }
}
