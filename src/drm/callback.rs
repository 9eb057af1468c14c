//! Compositor callback interface

use log::info;

/// Display identifier reported to the compositor
pub type DisplayId = u64;

/// Events delivered to the compositor while the device is enabled
pub trait DrmCallback: Send + Sync {
    /// A display became available (`connected`) or went away
    fn on_hotplug(&self, display: DisplayId, connected: bool);
}

/// Callback that only logs events
#[derive(Debug, Default)]
pub struct LogCallback;

impl DrmCallback for LogCallback {
    fn on_hotplug(&self, display: DisplayId, connected: bool) {
        info!(
            "Display {} {}",
            display,
            if connected { "connected" } else { "disconnected" }
        );
    }
}
