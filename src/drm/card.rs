//! DRM device access
//!
//! Opens the DRM device (/dev/dri/card*) and answers the two kernel
//! queries the display core needs: the mode resources (CRTCs and
//! connectors) and per-connector state.

use anyhow::{anyhow, Context, Result};
use drm::control::{connector, crtc, Device as ControlDevice, ResourceHandles};
use drm::Device as BasicDevice;
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsFd, BorrowedFd, FromRawFd, RawFd};
use std::path::Path;
use std::sync::OnceLock;

/// Kernel connector identifier
pub type ConnectorId = u32;

/// Kernel CRTC identifier (0 is never valid)
pub type CrtcId = u32;

/// Result of the mode resources query, in kernel order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// CRTC ids, indexed by pipe
    pub crtcs: Vec<CrtcId>,
    /// Connector ids
    pub connectors: Vec<ConnectorId>,
}

/// Connector state as reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorState {
    pub connected: bool,
    pub interface: connector::Interface,
    /// Per-interface index (the "1" in eDP-1)
    pub interface_id: u32,
    /// Pipes any of the connector's encoders can drive (bit per pipe)
    pub possible_pipes: u32,
    pub mode_count: usize,
}

/// Kernel mode-setting interface consumed by the device manager
pub trait KmsBackend: Send + Sync {
    /// Query mode resources
    fn resources(&self) -> Result<Resources>;

    /// Query current state of a connector
    fn connector(&self, id: ConnectorId) -> Result<ConnectorState>;
}

/// DRM device wrapper
pub struct Card {
    file: File,
    /// Mode resources from the first successful query; the CRTC list of a
    /// card does not change, so connector queries reuse it
    resources: OnceLock<ResourceHandles>,
}

// Trait implementations required by drm crate
impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

impl Card {
    /// Open DRM device read-write
    ///
    /// # Arguments
    /// * `path` - Device path (e.g., "/dev/dri/card0")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening DRM device: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Cannot open DRM device {}", path.display()))?;

        Ok(Self::with_file(file))
    }

    /// Create Card from a pre-opened file descriptor
    ///
    /// The fd is duplicated, so the original can be closed.
    pub fn from_fd(fd: RawFd) -> Result<Self> {
        info!("Creating DRM device from fd {}", fd);

        let dup_fd = nix::unistd::dup(fd).context("Failed to dup DRM fd")?;
        let file = unsafe { File::from_raw_fd(dup_fd) };

        Ok(Self::with_file(file))
    }

    fn with_file(file: File) -> Self {
        Self {
            file,
            resources: OnceLock::new(),
        }
    }

    /// Cached mode resources, queried on first use
    fn cached_resources(&self) -> Result<&ResourceHandles> {
        if let Some(resources) = self.resources.get() {
            return Ok(resources);
        }
        let resources = self
            .resource_handles()
            .context("Failed to get DRM mode resources")?;
        Ok(self.resources.get_or_init(|| resources))
    }

    /// Bit per pipe for every CRTC the connector's encoders can drive
    fn possible_pipes(&self, info: &connector::Info, resources: &ResourceHandles) -> u32 {
        let mut mask = 0u32;
        for &encoder_handle in info.encoders() {
            let Ok(encoder) = self.get_encoder(encoder_handle) else {
                continue;
            };
            for crtc_handle in resources.filter_crtcs(encoder.possible_crtcs()) {
                if let Some(pipe) = pipe_of(resources.crtcs(), crtc_handle) {
                    mask |= 1 << pipe;
                }
            }
        }
        mask
    }
}

impl KmsBackend for Card {
    fn resources(&self) -> Result<Resources> {
        let resources = self
            .resource_handles()
            .context("Failed to get DRM mode resources")?;

        debug!(
            "DRM resources: connectors={}, crtcs={}",
            resources.connectors().len(),
            resources.crtcs().len()
        );

        let result = Resources {
            crtcs: resources.crtcs().iter().map(|&h| u32::from(h)).collect(),
            connectors: resources.connectors().iter().map(|&h| u32::from(h)).collect(),
        };
        let _ = self.resources.set(resources);
        Ok(result)
    }

    fn connector(&self, id: ConnectorId) -> Result<ConnectorState> {
        let handle: connector::Handle = drm::control::from_u32(id)
            .ok_or_else(|| anyhow!("Invalid connector id {}", id))?;
        let info = self
            .get_connector(handle, false)
            .with_context(|| format!("Failed to get connector {} info", id))?;
        let resources = self.cached_resources()?;

        Ok(ConnectorState {
            connected: info.state() == connector::State::Connected,
            interface: info.interface(),
            interface_id: info.interface_id(),
            possible_pipes: self.possible_pipes(&info, resources),
            mode_count: info.modes().len(),
        })
    }
}

/// Pipe index of a CRTC (its position in the resources list)
fn pipe_of(crtcs: &[crtc::Handle], handle: crtc::Handle) -> Option<usize> {
    crtcs
        .iter()
        .position(|&h| h == handle)
        .filter(|&pipe| pipe < crate::constants::MAX_PIPES)
}

/// Check if connector is internal (laptop built-in display)
pub fn is_internal_connector(interface: connector::Interface) -> bool {
    use connector::Interface;
    matches!(
        interface,
        Interface::EmbeddedDisplayPort | Interface::LVDS | Interface::DSI
    )
}

/// Short kernel-style name of a connector interface (as in "eDP-1")
pub fn interface_name(interface: connector::Interface) -> &'static str {
    use connector::Interface;
    match interface {
        Interface::VGA => "VGA",
        Interface::DVII => "DVI-I",
        Interface::DVID => "DVI-D",
        Interface::DVIA => "DVI-A",
        Interface::Composite => "Composite",
        Interface::SVideo => "SVIDEO",
        Interface::LVDS => "LVDS",
        Interface::Component => "Component",
        Interface::NinePinDIN => "DIN",
        Interface::DisplayPort => "DP",
        Interface::HDMIA => "HDMI-A",
        Interface::HDMIB => "HDMI-B",
        Interface::TV => "TV",
        Interface::EmbeddedDisplayPort => "eDP",
        Interface::Virtual => "Virtual",
        Interface::DSI => "DSI",
        Interface::DPI => "DPI",
        _ => "Unknown",
    }
}
