//! Configuration management for termbridge.
//!
//! This module provides TOML configuration file loading from
//! `~/.termbridge/config.toml`.
//!
//! # Configuration File
//!
//! ```toml
//! # Shell command to bridge (optional)
//! shell = "bash"
//!
//! # Log verbosity: error, warn, info, debug, trace
//! log_level = "info"
//!
//! [fallback]
//! # Grid to assume when the hosting terminal cannot be measured
//! columns = 80
//! rows = 24
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command to bridge
    pub shell: Option<String>,
    /// Log verbosity
    pub log_level: String,
    /// Fallback grid when measurement fails
    pub fallback: FallbackGeometry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            log_level: "info".to_string(),
            fallback: FallbackGeometry::default(),
        }
    }
}

/// Fallback grid configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackGeometry {
    pub columns: u16,
    pub rows: u16,
}

impl Default for FallbackGeometry {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
        }
    }
}

impl Config {
    /// Load configuration from file. On first run the defaults are written
    /// out as a template for the user to edit.
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
                return Self::default();
            }
            let config = Self::default();
            let _ = config.save();
            return config;
        }
        Self::default()
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::get_config_path().ok_or_else(|| "Could not determine config path".to_string())?;
        self.save_to(&path)
    }

    fn save_to(&self, path: &std::path::Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Some(home) = home_dir() {
            let dir = home.join(".termbridge");
            if !dir.exists() {
                let _ = fs::create_dir_all(&dir);
            }
            return Some(dir.join("config.toml"));
        }
        None
    }
}

// Get home directory
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
