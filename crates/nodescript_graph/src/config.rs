// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine configuration, stored as RON.

use crate::error::ConfigError;
use crate::loader::DEFAULT_PALETTE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current configuration format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "nodescript.ron";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Format version
    pub version: u32,
    /// Number of category colour slots
    pub category_palette_size: usize,
    /// Whether node execution times are summed into run reports
    pub track_exec_time: bool,
    /// `tracing` filter directive used by hosts that install a subscriber
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            category_palette_size: DEFAULT_PALETTE_SIZE,
            track_exec_time: true,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            ron::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if config.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }
        Ok(config)
    }

    /// Load `dir/nodescript.ron` if it exists, defaults otherwise
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_file_path(dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        let content =
            ron::ser::to_string_pretty(self, config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configuration file path inside `dir`
    pub fn config_file_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }
}
