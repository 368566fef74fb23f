//! Configuration system for Strata.
//!
//! Runtime settings persist to disk as RON files. CLI flags parsed with clap
//! override the loaded values, and `reload` detects on-disk edits.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DebugConfig, ResidencyConfig, SelectionConfig, default_config_dir,
};
pub use error::ConfigError;
