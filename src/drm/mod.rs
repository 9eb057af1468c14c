//! DRM/KMS display management

pub mod callback;
pub mod card;
pub mod crtc;
pub mod device;
pub mod display;
pub mod hotplug;

pub use callback::{DisplayId, DrmCallback, LogCallback};
pub use card::{Card, ConnectorId, ConnectorState, CrtcId, KmsBackend, Resources};
pub use crtc::CrtcAllocator;
pub use device::DeviceManager;
pub use display::{ConnectorDisplay, Display, DisplayContext, DisplayFactory};
pub use hotplug::{HotplugHandle, HotplugNotifier, HotplugSource, HotplugThread, NullNotifier};
