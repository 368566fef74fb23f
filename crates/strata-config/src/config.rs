//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name used inside the config directory.
pub const CONFIG_FILE_NAME: &str = "strata.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Memory budgets and background loading.
    pub residency: ResidencyConfig,
    /// Per-frame fragment selection.
    pub selection: SelectionConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Budgets for the two residency tiers and the background loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResidencyConfig {
    /// Maximum bytes of fragment geometry resident on the graphics device.
    pub device_budget_bytes: u64,
    /// Maximum bytes of fragment data cached in main memory.
    pub main_memory_budget_bytes: u64,
    /// Worker threads for fragment loading (0 = derive from CPU count).
    pub loader_threads: usize,
    /// Maximum number of loads queued or running at once.
    pub max_in_flight_loads: usize,
}

/// Parameters for the view-dependent selection driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    /// Largest tolerated projected geometric error, in pixels.
    pub max_screen_space_error: f32,
    /// Upper bound on fragments newly enabled in one frame.
    pub max_enables_per_frame: u32,
    /// Vertical field of view used to project geometric error, in degrees.
    pub fov_y_degrees: f32,
    /// Viewport height used to project geometric error, in pixels.
    pub viewport_height: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log a residency summary every N frames (0 = never).
    pub stats_interval_frames: u32,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            device_budget_bytes: 256 * 1024 * 1024, // 256 MB
            main_memory_budget_bytes: 1024 * 1024 * 1024, // 1 GB
            loader_threads: 0,
            max_in_flight_loads: 64,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_screen_space_error: 2.0,
            max_enables_per_frame: 32,
            fov_y_degrees: 60.0,
            viewport_height: 720,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval_frames: 60,
        }
    }
}

/// Platform config directory for Strata, e.g. `~/.config/strata`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("strata"))
}

// --- Validation / Load / Save / Reload ---

impl Config {
    /// Reject values that would make the residency system misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.residency.device_budget_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "residency.device_budget_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.residency.max_in_flight_loads == 0 {
            return Err(ConfigError::Invalid {
                field: "residency.max_in_flight_loads",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.selection.max_screen_space_error > 0.0) {
            return Err(ConfigError::Invalid {
                field: "selection.max_screen_space_error",
                reason: format!("{} is not positive", self.selection.max_screen_space_error),
            });
        }
        if !(1.0..180.0).contains(&self.selection.fov_y_degrees) {
            return Err(ConfigError::Invalid {
                field: "selection.fov_y_degrees",
                reason: format!("{} is outside 1..180", self.selection.fov_y_degrees),
            });
        }
        Ok(())
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
