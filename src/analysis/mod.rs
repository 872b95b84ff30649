//! Analysis of stored readings
//!
//! This module provides:
//! - Summary statistics (count, mean, min, max, population std dev)
//! - Batch cleaning and outlier filtering ahead of aggregation

pub mod processor;
pub mod stats;

pub use processor::{DataProcessor, ProcessStatus, ProcessedData};
pub use stats::{AggregatedResult, StatsAggregator};
