//! Display abstraction
//!
//! One display per DRM connector. The device manager only needs the
//! narrow [`Display`] interface; [`ConnectorDisplay`] implements it on
//! top of the kernel connector state.

use log::{info, warn};
use std::fmt;

use super::callback::{DisplayId, DrmCallback};
use super::card::{interface_name, is_internal_connector, ConnectorId, ConnectorState, KmsBackend};
use super::crtc::CrtcAllocator;
use crate::constants::NO_CRTC;

/// Device state lent to a display while the device lock is held
pub struct DisplayContext<'a> {
    pub backend: &'a dyn KmsBackend,
    pub crtcs: &'a mut CrtcAllocator,
    /// Compositor callback (only while the device is enabled)
    pub callback: Option<&'a dyn DrmCallback>,
    /// Display reported by enable() while the others wait for
    /// report_external(); their hotplug changes are not reported
    pub pending_primary: Option<DisplayId>,
}

impl<'a> DisplayContext<'a> {
    /// Callback for changes of `display`, unless its reports are held back
    pub fn reporter(&self, display: DisplayId) -> Option<&'a dyn DrmCallback> {
        match self.pending_primary {
            Some(primary) if primary != display => None,
            _ => self.callback,
        }
    }
}

/// A physical output as seen by the device manager
pub trait Display: fmt::Display + Send {
    fn id(&self) -> DisplayId;

    fn connected(&self) -> bool;

    /// Built-in panel (eDP, LVDS, DSI)
    fn internal(&self) -> bool;

    /// Human readable name
    fn name(&self) -> String {
        self.to_string()
    }

    /// Announce the display to the compositor
    fn report(&self, callback: &dyn DrmCallback);

    /// Refresh state from the kernel
    fn update(&mut self, ctx: &mut DisplayContext<'_>);

    /// Power on: acquire a CRTC. Returns false if none is available.
    fn enable(&mut self, ctx: &mut DisplayContext<'_>) -> bool;

    /// Power off: release the CRTC, if any
    fn disable(&mut self, ctx: &mut DisplayContext<'_>);
}

/// Builds the display for a connector discovered at initialization
pub type DisplayFactory = Box<dyn Fn(ConnectorId) -> Box<dyn Display> + Send + Sync>;

/// Display backed by a DRM connector
pub struct ConnectorDisplay {
    connector: ConnectorId,
    /// Last known kernel state (None until the first update)
    state: Option<ConnectorState>,
    /// Reserved pipe while enabled
    pipe: Option<usize>,
}

impl ConnectorDisplay {
    pub fn new(connector: ConnectorId) -> Self {
        Self {
            connector,
            state: None,
            pipe: None,
        }
    }

    /// Factory for the device manager
    pub fn factory() -> DisplayFactory {
        Box::new(|connector| Box::new(ConnectorDisplay::new(connector)) as Box<dyn Display>)
    }

    /// Kernel-style name, e.g. "eDP-1"
    pub fn connector_name(&self) -> String {
        match &self.state {
            Some(state) => format!("{}-{}", interface_name(state.interface), state.interface_id),
            None => format!("connector-{}", self.connector),
        }
    }

    /// Pipe currently driving this display
    pub fn pipe(&self) -> Option<usize> {
        self.pipe
    }

    pub fn mode_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.mode_count)
    }

    fn release(&mut self, crtcs: &mut CrtcAllocator) {
        if let Some(pipe) = self.pipe.take() {
            crtcs.free(pipe);
        }
    }
}

impl Display for ConnectorDisplay {
    fn id(&self) -> DisplayId {
        DisplayId::from(self.connector)
    }

    fn connected(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.connected)
    }

    fn internal(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| is_internal_connector(s.interface))
    }

    fn name(&self) -> String {
        self.connector_name()
    }

    fn report(&self, callback: &dyn DrmCallback) {
        callback.on_hotplug(self.id(), true);
    }

    fn update(&mut self, ctx: &mut DisplayContext<'_>) {
        let state = match ctx.backend.connector(self.connector) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to update display {}: {:#}", self, e);
                return;
            }
        };

        let was_connected = self.connected();
        self.state = Some(state);
        let connected = self.connected();
        if connected == was_connected {
            return;
        }

        info!(
            "Display {} {}",
            self,
            if connected { "connected" } else { "disconnected" }
        );
        if !connected {
            self.release(ctx.crtcs);
        }
        if let Some(callback) = ctx.reporter(self.id()) {
            callback.on_hotplug(self.id(), connected);
        }
    }

    fn enable(&mut self, ctx: &mut DisplayContext<'_>) -> bool {
        if self.pipe.is_some() {
            return true;
        }
        let Some(state) = self.state.as_ref().filter(|s| s.connected) else {
            return false;
        };

        let possible = state.possible_pipes;
        for pipe in 0..ctx.crtcs.len() {
            if possible & (1 << pipe) == 0 {
                continue;
            }
            let crtc = ctx.crtcs.reserve(pipe);
            if crtc != NO_CRTC {
                info!("Display {} using CRTC {} (pipe {})", self, crtc, pipe);
                self.pipe = Some(pipe);
                return true;
            }
        }

        warn!("No free CRTC for display {}", self);
        false
    }

    fn disable(&mut self, ctx: &mut DisplayContext<'_>) {
        self.release(ctx.crtcs);
    }
}

impl fmt::Display for ConnectorDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.connector_name(), self.connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::card::Resources;
    use anyhow::{anyhow, Result};
    use drm::control::connector::Interface;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeBackend {
        connectors: Mutex<HashMap<ConnectorId, ConnectorState>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                connectors: Mutex::new(HashMap::new()),
            }
        }

        fn set(&self, id: ConnectorId, interface: Interface, connected: bool, possible_pipes: u32) {
            self.connectors.lock().unwrap().insert(
                id,
                ConnectorState {
                    connected,
                    interface,
                    interface_id: 1,
                    possible_pipes,
                    mode_count: if connected { 3 } else { 0 },
                },
            );
        }
    }

    impl KmsBackend for FakeBackend {
        fn resources(&self) -> Result<Resources> {
            Ok(Resources::default())
        }

        fn connector(&self, id: ConnectorId) -> Result<ConnectorState> {
            self.connectors
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow!("no connector {}", id))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(DisplayId, bool)>>);

    impl DrmCallback for Recorder {
        fn on_hotplug(&self, display: DisplayId, connected: bool) {
            self.0.lock().unwrap().push((display, connected));
        }
    }

    #[test]
    fn test_unknown_until_updated() {
        let display = ConnectorDisplay::new(7);
        assert!(!display.connected());
        assert!(!display.internal());
        assert_eq!(display.to_string(), "connector-7 (7)");
    }

    #[test]
    fn test_update_reads_state() {
        let backend = FakeBackend::new();
        backend.set(42, Interface::EmbeddedDisplayPort, true, 0b11);
        let mut crtcs = CrtcAllocator::new(vec![100, 101]);
        let mut display = ConnectorDisplay::new(42);

        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: None,
            pending_primary: None,
        };
        display.update(&mut ctx);

        assert!(display.connected());
        assert!(display.internal());
        assert_eq!(display.id(), 42);
        assert_eq!(display.mode_count(), 3);
        assert_eq!(display.to_string(), "eDP-1 (42)");
        assert_eq!(Display::name(&display), "eDP-1");
    }

    #[test]
    fn test_update_failure_keeps_state() {
        let backend = FakeBackend::new();
        let mut crtcs = CrtcAllocator::default();
        let mut display = ConnectorDisplay::new(9);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: None,
            pending_primary: None,
        };
        display.update(&mut ctx);
        assert!(!display.connected());
    }

    #[test]
    fn test_hotplug_reported_on_change_only() {
        let backend = FakeBackend::new();
        let recorder = Recorder::default();
        let mut crtcs = CrtcAllocator::new(vec![100]);
        let mut display = ConnectorDisplay::new(5);

        backend.set(5, Interface::HDMIA, true, 0b1);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: Some(&recorder),
            pending_primary: None,
        };
        display.update(&mut ctx);
        display.update(&mut ctx);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(5, true)]);

        backend.set(5, Interface::HDMIA, false, 0b1);
        display.update(&mut ctx);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(5, true), (5, false)]);
    }

    #[test]
    fn test_hotplug_held_while_primary_pending() {
        let backend = FakeBackend::new();
        let recorder = Recorder::default();
        let mut crtcs = CrtcAllocator::new(vec![100]);
        let mut primary = ConnectorDisplay::new(4);
        let mut external = ConnectorDisplay::new(5);

        backend.set(4, Interface::EmbeddedDisplayPort, true, 0b1);
        backend.set(5, Interface::HDMIA, true, 0b1);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: Some(&recorder),
            pending_primary: Some(4),
        };
        external.update(&mut ctx);
        assert!(external.connected());
        assert!(recorder.0.lock().unwrap().is_empty());

        // The primary itself is still reported
        primary.update(&mut ctx);
        backend.set(4, Interface::EmbeddedDisplayPort, false, 0b1);
        primary.update(&mut ctx);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(4, true), (4, false)]);
    }

    #[test]
    fn test_enable_reserves_allowed_pipe() {
        let backend = FakeBackend::new();
        backend.set(5, Interface::HDMIA, true, 0b10);
        let mut crtcs = CrtcAllocator::new(vec![100, 101]);
        let mut display = ConnectorDisplay::new(5);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: None,
            pending_primary: None,
        };
        display.update(&mut ctx);

        assert!(display.enable(&mut ctx));
        assert_eq!(display.pipe(), Some(1));
        // Enabling again keeps the same pipe
        assert!(display.enable(&mut ctx));
        assert!(ctx.crtcs.is_reserved(1));
        assert!(!ctx.crtcs.is_reserved(0));

        display.disable(&mut ctx);
        assert_eq!(display.pipe(), None);
        assert!(!ctx.crtcs.is_reserved(1));
    }

    #[test]
    fn test_enable_fails_when_pipes_taken() {
        let backend = FakeBackend::new();
        backend.set(5, Interface::HDMIA, true, 0b01);
        let mut crtcs = CrtcAllocator::new(vec![100, 101]);
        crtcs.reserve(0);
        let mut display = ConnectorDisplay::new(5);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: None,
            pending_primary: None,
        };
        display.update(&mut ctx);
        assert!(!display.enable(&mut ctx));
        assert_eq!(display.pipe(), None);
    }

    #[test]
    fn test_enable_requires_connection() {
        let backend = FakeBackend::new();
        backend.set(5, Interface::HDMIA, false, 0b1);
        let mut crtcs = CrtcAllocator::new(vec![100]);
        let mut display = ConnectorDisplay::new(5);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: None,
            pending_primary: None,
        };
        display.update(&mut ctx);
        assert!(!display.enable(&mut ctx));
    }

    #[test]
    fn test_disconnect_releases_pipe() {
        let backend = FakeBackend::new();
        backend.set(5, Interface::DisplayPort, true, 0b1);
        let mut crtcs = CrtcAllocator::new(vec![100]);
        let mut display = ConnectorDisplay::new(5);
        let mut ctx = DisplayContext {
            backend: &backend,
            crtcs: &mut crtcs,
            callback: None,
            pending_primary: None,
        };
        display.update(&mut ctx);
        assert!(display.enable(&mut ctx));

        backend.set(5, Interface::DisplayPort, false, 0b1);
        display.update(&mut ctx);
        assert_eq!(display.pipe(), None);
        assert!(!ctx.crtcs.is_reserved(0));
    }
}
