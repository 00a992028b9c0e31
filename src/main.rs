//! # Edge Noise Node - Main Entry Point
//!
//! Firmware-style loop for a battery powered noise sensor. Every wake cycle:
//!
//! 1. **Records** a few seconds of microphone audio into a WAV file on storage
//! 2. **Uploads** the file to the collection server as a streamed
//!    `multipart/form-data` POST with chunked transfer encoding
//! 3. **Suspends** until the next scheduled wake
//!
//! ## Application Architecture:
//! - **config**: Node configuration (node.toml + environment variables)
//! - **error**: Failure kinds shared by every stage of a cycle
//! - **storage**: Filesystem holding the per-cycle recording
//! - **audio**: Analog input, sample clock and WAV framing
//! - **http**: Chunked framing, multipart envelope and the transport session
//! - **network**: Waits for the link before an upload
//! - **power**: Wake scheduling and suspend
//! - **pipeline**: One acquisition-then-upload cycle

mod audio;     // Analog input, sample clock, WAV framing (audio/ directory)
mod config;    // Configuration management (config.rs)
mod error;     // Error handling types (error.rs)
mod http;      // Streamed HTTP upload (http/ directory)
mod network;   // Link association gate (network.rs)
mod pipeline;  // Capture-then-upload cycle (pipeline.rs)
mod power;     // Low-power scheduling (power.rs)
mod storage;   // Recording storage (storage.rs)

use anyhow::{Context, Result};
use crate::config::NodeConfig;
use power::{PowerScheduler, WakeReason};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Node entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `node.toml` and the environment
/// 2. **Sets up logging** with `RUST_LOG` support
/// 3. **Runs cycles** until the configured count is reached or a shutdown
///    signal arrives
///
/// A failed cycle is logged once and followed by the normal suspend; the next
/// wake starts over with fresh storage and a fresh connection.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let loaded = NodeConfig::load().context("loading configuration")?;
    loaded.validate().context("validating configuration")?;
    let config = crate::config::install(loaded);

    info!("Starting edge-noise-node v{}", env!("CARGO_PKG_VERSION"));
    info!(
        device_id = %config.device.id,
        collector = %format!("{}:{}{}", config.upload.host, config.upload.port, config.upload.path),
        tls = config.upload.use_tls,
        "Configuration loaded"
    );

    let mut input = audio::adc::open_input(&config.audio).context("opening analog input")?;
    let mut scheduler = PowerScheduler::new();
    power::install_signal_handlers();

    let mut completed = 0u32;
    loop {
        match pipeline::run_cycle(config, input.as_mut()).await {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(json) => info!(report = %json, "Cycle complete"),
                Err(e) => error!(error = %e, "Failed to serialize cycle report"),
            },
            Err(e) => error!(kind = e.kind(), error = %e, "Cycle failed"),
        }

        completed += 1;
        if config.power.cycles != 0 && completed >= config.power.cycles {
            info!(cycles = completed, "Configured cycle count reached");
            break;
        }

        scheduler.schedule_wake_after(Duration::from_secs(config.power.sleep_secs));
        if scheduler.suspend_now().await == WakeReason::Shutdown {
            info!("Shutdown requested, leaving cycle loop");
            break;
        }
    }

    info!("Node stopped");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "info", "edge_noise_node=trace")
/// - If not set, defaults to "edge_noise_node=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edge_noise_node=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}
