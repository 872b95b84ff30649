//! # Reservoir-RS: Water Reservoir Sensor Pipeline
//!
//! A multi-threaded ingestion pipeline for water-conservancy sensors. Sensor
//! threads produce timestamped readings into a bounded channel, pipeline
//! workers validate and store them, and a small worker pool delivers alerts
//! and other background jobs.
//!
//! ## Architecture
//!
//! - **Channel**: [`channel::BoundedChannel`], a closable FIFO with blocking timeouts
//! - **Pool**: [`pool::WorkerPool`], fixed-size threads running boxed closures
//! - **Sensors**: [`sensor::SensorSource`] polls one [`sensor::Sensor`] per thread
//! - **Pipeline**: [`pipeline::Pipeline`] wires sensors, workers, storage and alerts
//! - **Messaging**: [`messaging::MessageBus`] fans alerts and status out by topic
//! - **Analysis**: [`analysis::StatsAggregator`] and [`analysis::DataProcessor`]
//! - **Storage**: [`storage::StorageSink`] with the in-memory [`storage::MemoryStore`]
//!
//! ## Configuration
//!
//! Everything is driven by an explicit [`config::PipelineConfig`], loaded from
//! TOML or built in code. The default file lives in the platform config
//! directory under `dev.hxyulin.reservoir-rs`.
//!
//! ## Example
//!
//! ```no_run
//! use reservoir_rs::{Pipeline, PipelineConfig};
//! use std::time::Duration;
//!
//! fn main() -> reservoir_rs::Result<()> {
//!     let pipeline = Pipeline::from_config(PipelineConfig::sample())?;
//!     pipeline.start()?;
//!
//!     std::thread::sleep(Duration::from_secs(10));
//!
//!     pipeline.stop();
//!     println!("{}", pipeline.stats());
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod channel;
pub mod config;
pub mod error;
pub mod messaging;
pub mod pipeline;
pub mod pool;
pub mod sensor;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use analysis::{AggregatedResult, DataProcessor, StatsAggregator};
pub use channel::{BoundedChannel, PushError};
pub use config::{PipelineConfig, SensorSettings};
pub use error::{ReservoirError, Result};
pub use messaging::{Message, MessageBus, Topic};
pub use pipeline::{Alert, AlertSink, Pipeline, PipelineWorker};
pub use pool::WorkerPool;
pub use sensor::{Sensor, SensorSimulator, SensorSource, SimulatedSensor};
pub use storage::{MemoryStore, StorageSink};
pub use types::{ProcessingStats, SensorKind, SensorRecord, SensorStatus};
