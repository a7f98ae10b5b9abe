// src/main.rs

// Declare modules
pub mod buffer;
pub mod compositor;
pub mod config;
pub mod dylib;
pub mod error;
pub mod gpu;
pub mod importer;
pub mod platform;
pub mod plugin;
pub mod scene;
pub mod transfer;

use crate::{
    config::CONFIG,
    plugin::{CompositorPlugin, StandaloneHost},
};

use anyhow::Context;
use log::info;
use nix::sys::signal::{SigSet, Signal};

/// Main entry point for the standalone compositor daemon.
fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting dma-compositor...");

    // Block the termination signals before any thread is spawned so every
    // thread inherits the mask and only `wait` below sees them.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
        .thread_block()
        .context("Failed to block termination signals")?;

    let host = StandaloneHost::new(&CONFIG)?;
    let mut plugin = CompositorPlugin::new();
    plugin
        .configure(&host)
        .context("Failed to configure the compositor")?;

    let signal = signals.wait().context("Failed to wait for a signal")?;
    info!("Received {}, shutting down.", signal);

    plugin.deinitialize();
    info!("dma-compositor exited cleanly.");
    Ok(())
}
