//! Headless demo: flies a camera over synthetic terrain and keeps the visible
//! fragments resident on a recording device.
//!
//! Configuration is loaded from `strata.ron` and can be overridden via CLI
//! flags, e.g. `cargo run -p strata-demo -- --frames 600 --device-budget-mb 8`.

mod driver;
mod terrain;

use clap::Parser;
use strata_config::{CliArgs, Config, default_config_dir};
use strata_fragment::RecordingDevice;
use strata_math::Vec3;
use tracing::info;

use crate::driver::{Driver, FrameStats};
use crate::terrain::{SyntheticTerrain, TerrainParams};

/// Camera position at `frame` on a slow descending spiral over the terrain.
fn camera_at(frame: u32, frames: u32, extent: f32) -> Vec3 {
    let t = frame as f32 / frames.max(1) as f32;
    let angle = t * std::f32::consts::TAU;
    let radius = extent * 0.35;
    let height = extent * (0.6 - 0.55 * t);
    Vec3::new(angle.cos() * radius, height, angle.sin() * radius)
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    strata_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    let terrain = match SyntheticTerrain::generate(TerrainParams::default()) {
        Ok(terrain) => terrain,
        Err(e) => {
            tracing::error!("Failed to generate terrain: {e}");
            std::process::exit(1);
        }
    };
    let mut driver = match Driver::new(terrain, &config) {
        Ok(driver) => driver,
        Err(e) => {
            tracing::error!("Failed to start fragment loader: {e}");
            std::process::exit(1);
        }
    };

    let extent = driver.terrain().params().extent;
    let mut device = RecordingDevice::new();
    let mut totals = FrameStats::default();
    let mut peak_device_bytes = 0;
    for frame in 0..args.frames {
        let stats = driver.frame(&mut device, camera_at(frame, args.frames, extent));
        totals.rendered += stats.rendered;
        totals.load_requests += stats.load_requests;
        totals.load_failures += stats.load_failures;
        totals.evictions += stats.evictions;
        peak_device_bytes = peak_device_bytes.max(stats.device_bytes);
        device.clear_log();
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    let resident = driver.tracker().tracked_count();
    driver.shutdown(&mut device);
    info!(
        resident_before_shutdown = resident,
        frames = args.frames,
        draws = totals.rendered,
        loads = totals.load_requests,
        load_failures = totals.load_failures,
        evictions = totals.evictions,
        peak_device_bytes,
        leaked_bytes = device.live_bytes(),
        "demo finished"
    );
}
