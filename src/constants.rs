//! Global constants for drmfb
//!
//! Consolidates device, configuration and hotplug constants
//! to eliminate magic values throughout the codebase.

// ============================================================================
// Device Selection
// ============================================================================

/// Configuration key naming the DRM device node
pub const DEVICE_PROPERTY: &str = "hwc.drm.device";

/// Environment variable overriding the configured DRM device node
pub const DEVICE_ENV: &str = "HWC_DRM_DEVICE";

/// DRM device used when nothing else is configured
pub const DEFAULT_DEVICE: &str = "/dev/dri/card0";

// ============================================================================
// Configuration Files
// ============================================================================

/// Directory name under the user config dir (~/.config/drmfb)
pub const CONFIG_DIR_NAME: &str = "drmfb";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// System-wide config file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/drmfb/config.toml";

// ============================================================================
// Hotplug
// ============================================================================

/// Name of the hotplug worker thread
pub const HOTPLUG_THREAD_NAME: &str = "drmfb-hotplug";

/// How long the hotplug worker blocks on the udev socket before
/// re-checking whether it should keep running
pub const HOTPLUG_POLL_TIMEOUT_MS: u64 = 1000;

/// udev subsystem carrying connector change events
pub const HOTPLUG_SUBSYSTEM: &str = "drm";

// ============================================================================
// CRTC Allocation
// ============================================================================

/// Upper bound on pipes tracked by the usage bitmask
/// (matches the width of the kernel's possible_crtcs mask)
pub const MAX_PIPES: usize = 32;

/// Returned by CRTC reservation on failure; never a valid CRTC id
pub const NO_CRTC: u32 = 0;
