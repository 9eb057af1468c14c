//! Configuration file management
//!
//! Loads TOML configuration files and provides service settings.
//! Search order: ~/.config/drmfb/config.toml, then /etc/drmfb/config.toml.
//!
//! The DRM device is resolved once here (`hwc.drm.device`) and handed to
//! the device manager explicitly.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_DEVICE, DEVICE_ENV, DEVICE_PROPERTY,
    HOTPLUG_POLL_TIMEOUT_MS, SYSTEM_CONFIG_PATH,
};

/// Service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Composer settings (`[hwc.drm]`)
    pub hwc: HwcConfig,
    /// Hotplug settings
    pub hotplug: HotplugConfig,
}

/// Composer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HwcConfig {
    /// DRM settings
    pub drm: DrmConfig,
}

/// DRM device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrmConfig {
    /// DRM device node (default: /dev/dri/card0)
    pub device: PathBuf,
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
        }
    }
}

/// Hotplug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// Watch udev for connector changes
    /// When false, connector state is only refreshed on enable
    pub enabled: bool,
    /// udev wait timeout in milliseconds (default: 1000)
    pub poll_timeout_ms: u64,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_timeout_ms: HOTPLUG_POLL_TIMEOUT_MS,
        }
    }
}

impl HotplugConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Config {
    /// Find the first existing config file (user, then system)
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Some(system);
        }

        None
    }

    /// Load settings, falling back to built-in defaults
    ///
    /// The environment override is applied last.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) => match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                    Self::default()
                }
            },
            None => {
                info!("Using built-in default config");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize settings (for `--print-config`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup(DEVICE_ENV).filter(|v| !v.is_empty()) {
            info!("{} overridden by {}: {}", DEVICE_PROPERTY, DEVICE_ENV, device);
            self.hwc.drm.device = PathBuf::from(device);
        }
    }

    /// Resolved DRM device node
    pub fn device_path(&self) -> &Path {
        &self.hwc.drm.device
    }
}

/// Get default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
