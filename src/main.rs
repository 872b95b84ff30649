//! Reservoir pipeline demo - Main Entry Point
//!
//! Runs the simulated sensor fleet through the pipeline for a while, printing
//! statistics periodically, then shuts down and prints per-sensor aggregates.
//!
//! Usage: `reservoir-rs [CONFIG_FILE] [RUN_SECONDS]`
//!
//! Without a config file the default config path is tried, then the built-in
//! sample fleet is used.

use anyhow::Context;
use reservoir_rs::config::{default_config_path, PipelineConfig};
use reservoir_rs::{Pipeline, Topic};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_RUN_SECONDS: u64 = 30;
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reservoir_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from).or_else(default_config_path);
    let run_for = match args.next() {
        Some(secs) => Duration::from_secs(
            secs.parse()
                .with_context(|| format!("Invalid run time {:?}, expected seconds", secs))?,
        ),
        None => Duration::from_secs(DEFAULT_RUN_SECONDS),
    };

    let config = match &config_path {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {:?}", path);
            PipelineConfig::load(path)?
        }
        _ => {
            tracing::info!("No config file found, using the sample sensor fleet");
            PipelineConfig::sample()
        }
    };

    tracing::info!("Starting reservoir pipeline for {:?}", run_for);

    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;

    let bus = pipeline.bus();
    bus.subscribe(Topic::AlertHighWater, |m| {
        println!("[alert] {}", m.content);
    });
    bus.subscribe(Topic::AlertDeviceFault, |m| {
        println!("[fault] {}", m.content);
    });
    bus.subscribe(Topic::SystemStatus, |m| {
        println!("[status] {}", m.content);
    });
    bus.subscribe(Topic::SystemHeartbeat, |m| {
        tracing::debug!("heartbeat from {}: {}", m.sender_id, m.content);
    });

    pipeline.start().context("Failed to start pipeline")?;

    let started = Instant::now();
    while started.elapsed() < run_for {
        let remaining = run_for.saturating_sub(started.elapsed());
        std::thread::sleep(remaining.min(REPORT_INTERVAL));

        let sensors = pipeline.simulator_stats();
        println!(
            "[{:>4}s] {} | sensors active={} generated={} dropped={} | alerts={}",
            started.elapsed().as_secs(),
            pipeline.stats(),
            sensors.active_sensors,
            sensors.generated,
            sensors.dropped,
            pipeline.alerts_raised()
        );
        pipeline.heartbeat();
    }

    tracing::info!("Shutting down...");
    pipeline.stop();

    let stats = pipeline.stats();
    println!();
    println!("Final statistics");
    println!("  processed:    {}", stats.total_processed);
    println!("  errors:       {}", stats.total_errors);
    println!("  success rate: {:.1}%", stats.success_rate());
    println!("  avg latency:  {:.3} ms", stats.average_latency_ms);
    println!("  alerts:       {}", pipeline.alerts_raised());
    let messages = pipeline.bus().stats();
    println!(
        "  messages:     {} published, {} delivered",
        messages.published, messages.consumed
    );

    println!();
    println!("Per-sensor aggregates");
    for (sensor_id, result) in pipeline.aggregate_all()? {
        println!("  {:<8} {}", sensor_id, result);
    }

    Ok(())
}
