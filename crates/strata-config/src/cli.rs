//! Command-line argument parsing for Strata.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Strata command-line arguments.
///
/// CLI values override settings loaded from the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "strata", about = "Level-of-detail terrain residency demo")]
pub struct CliArgs {
    /// Device memory budget in megabytes.
    #[arg(long)]
    pub device_budget_mb: Option<u64>,

    /// Main-memory cache budget in megabytes.
    #[arg(long)]
    pub main_memory_budget_mb: Option<u64>,

    /// Number of background loader threads.
    #[arg(long)]
    pub loader_threads: Option<usize>,

    /// Maximum tolerated screen-space error in pixels.
    #[arg(long)]
    pub max_error: Option<f32>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 120)]
    pub frames: u32,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

const MEGABYTE: u64 = 1024 * 1024;

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(mb) = args.device_budget_mb {
            self.residency.device_budget_bytes = mb * MEGABYTE;
        }
        if let Some(mb) = args.main_memory_budget_mb {
            self.residency.main_memory_budget_bytes = mb * MEGABYTE;
        }
        if let Some(threads) = args.loader_threads {
            self.residency.loader_threads = threads;
        }
        if let Some(error) = args.max_error {
            self.selection.max_screen_space_error = error;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
