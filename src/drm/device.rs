//! DRM device management
//!
//! Owns the DRM device handle, the CRTC pool and the displays attached to
//! each connector, and decides which display is reported to the
//! compositor first.
//!
//! Two threads touch this state: the compositor thread (initialize,
//! enable/disable, CRTC reservation, display lookup) and the hotplug
//! thread (update). Everything mutable lives behind a single mutex.

use log::{error, info};
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::callback::{DisplayId, DrmCallback};
use super::card::{Card, ConnectorId, CrtcId, KmsBackend};
use super::crtc::CrtcAllocator;
use super::display::{ConnectorDisplay, Display, DisplayContext, DisplayFactory};
use super::hotplug::{HotplugHandle, HotplugNotifier, HotplugTarget, HotplugThread, NullNotifier};
use crate::config::Config;

/// Mutable device state
#[derive(Default)]
struct State {
    /// Connector -> Display, iterated in connector id order
    displays: BTreeMap<ConnectorId, Box<dyn Display>>,
    crtcs: CrtcAllocator,
    /// Set between enable() and disable()
    callback: Option<Arc<dyn DrmCallback>>,
    /// Display reported during enable() whose siblings are still unreported;
    /// hotplug changes of the siblings are held back until report_external()
    primary: Option<DisplayId>,
}

impl State {
    /// Run `f` on every display with a context borrowed from this state
    fn for_each_display<F>(&mut self, backend: &dyn KmsBackend, mut f: F)
    where
        F: FnMut(&mut dyn Display, &mut DisplayContext<'_>),
    {
        let State {
            displays,
            crtcs,
            callback,
            primary,
        } = self;
        let mut ctx = DisplayContext {
            backend,
            crtcs,
            callback: callback.as_deref(),
            pending_primary: *primary,
        };
        for display in displays.values_mut() {
            f(display.as_mut(), &mut ctx);
        }
    }
}

/// State shared with the hotplug notifier
struct Shared {
    /// None if the device could not be opened
    backend: Option<Arc<dyn KmsBackend>>,
    factory: DisplayFactory,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_locked(&self, state: &mut State) {
        // TODO: add connectors that appear after initialize() (DP MST)
        if let Some(backend) = self.backend.as_deref() {
            state.for_each_display(backend, |display, ctx| display.update(ctx));
        }
    }
}

impl HotplugTarget for Shared {
    fn update(&self) {
        let mut state = self.lock();
        self.update_locked(&mut state);
    }
}

/// DRM device with its displays
pub struct DeviceManager {
    shared: Arc<Shared>,
    hotplug: Mutex<Box<dyn HotplugNotifier>>,
}

impl DeviceManager {
    /// Assemble a manager from its parts
    ///
    /// `notifier` receives a handle bound to the new manager; the notifier
    /// it returns is started and stopped by `enable()`/`disable()`.
    pub fn with_backend<N>(
        backend: Option<Arc<dyn KmsBackend>>,
        factory: DisplayFactory,
        notifier: N,
    ) -> Self
    where
        N: FnOnce(HotplugHandle) -> Box<dyn HotplugNotifier>,
    {
        let shared = Arc::new(Shared {
            backend,
            factory,
            state: Mutex::new(State::default()),
        });
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let hotplug = notifier(HotplugHandle::new(weak));

        Self {
            shared,
            hotplug: Mutex::new(hotplug),
        }
    }

    /// Manager over an opened card (or an invalid handle), with
    /// connector-backed displays and udev hotplug
    fn with_card(card: Option<Card>, config: &Config) -> Self {
        let backend = card.map(|card| Arc::new(card) as Arc<dyn KmsBackend>);
        let hotplug = config.hotplug.clone();

        Self::with_backend(backend, ConnectorDisplay::factory(), move |handle| {
            let notifier: Box<dyn HotplugNotifier> = if hotplug.enabled {
                Box::new(HotplugThread::new(handle, hotplug.poll_timeout()))
            } else {
                Box::new(NullNotifier)
            };
            notifier
        })
    }

    /// Adopt an already open DRM fd (duplicated)
    pub fn from_fd(fd: RawFd) -> Self {
        let card = match Card::from_fd(fd) {
            Ok(card) => Some(card),
            Err(e) => {
                error!("Failed to adopt DRM device fd {}: {:#}", fd, e);
                None
            }
        };
        Self::with_card(card, &Config::default())
    }

    /// Open a DRM device node
    ///
    /// Never fails: on error the failure is logged and the manager is left
    /// with an invalid handle, so `initialize()` returns false.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::open_with_config(path.as_ref(), &Config::default())
    }

    /// Open the device named by `hwc.drm.device`
    pub fn from_config(config: &Config) -> Self {
        Self::open_with_config(config.device_path(), config)
    }

    fn open_with_config(path: &Path, config: &Config) -> Self {
        let card = match Card::open(path) {
            Ok(card) => Some(card),
            Err(e) => {
                error!("Failed to open DRM device ({}): {:#}", path.display(), e);
                None
            }
        };
        Self::with_card(card, config)
    }

    /// Whether the device handle is usable
    pub fn is_valid(&self) -> bool {
        self.shared.backend.is_some()
    }

    /// Query mode resources and create a display per connector
    ///
    /// Must be called once before anything that touches displays or CRTCs.
    pub fn initialize(&self) -> bool {
        let Some(backend) = self.shared.backend.as_deref() else {
            return false;
        };

        let resources = match backend.resources() {
            Ok(resources) => resources,
            Err(e) => {
                error!("Failed to get DRM mode resources: {:#}", e);
                return false;
            }
        };

        info!(
            "DRM resources: connectors={}, crtcs={}",
            resources.connectors.len(),
            resources.crtcs.len()
        );

        let mut state = self.shared.lock();
        state.crtcs.assign(resources.crtcs);
        for connector in resources.connectors {
            state
                .displays
                .entry(connector)
                .or_insert_with(|| (self.shared.factory)(connector));
        }
        true
    }

    /// CRTC ids in pipe order
    pub fn crtcs(&self) -> Vec<CrtcId> {
        self.shared.lock().crtcs.crtcs().to_vec()
    }

    /// Reserve the CRTC at `pipe`
    ///
    /// Returns 0 if the pipe is out of range or already in use.
    pub fn reserve_crtc(&self, pipe: usize) -> CrtcId {
        self.shared.lock().crtcs.reserve(pipe)
    }

    /// Release the CRTC at `pipe` (no-op if out of range or free)
    pub fn free_crtc(&self, pipe: usize) {
        self.shared.lock().crtcs.free(pipe);
    }

    /// Look up a connected display
    ///
    /// `f` runs with the device locked; returns None for unknown or
    /// disconnected connectors.
    pub fn connected_display<R, F>(&self, connector: ConnectorId, f: F) -> Option<R>
    where
        F: FnOnce(&dyn Display) -> R,
    {
        let state = self.shared.lock();
        state
            .displays
            .get(&connector)
            .filter(|display| display.connected())
            .map(|display| f(display.as_ref()))
    }

    /// Ids of all connected displays, in connector order
    pub fn connected_displays(&self) -> Vec<DisplayId> {
        self.shared
            .lock()
            .displays
            .values()
            .filter(|d| d.connected())
            .map(|d| d.id())
            .collect()
    }

    /// Look up a connected display for reconfiguration
    ///
    /// Like [`connected_display`](Self::connected_display), but `f` may
    /// change the display and reserve or free CRTCs through the context.
    pub fn with_connected_display<R, F>(&self, connector: ConnectorId, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Display, &mut DisplayContext<'_>) -> R,
    {
        let backend = self.shared.backend.as_deref()?;
        let mut state = self.shared.lock();
        let State {
            displays,
            crtcs,
            callback,
            primary,
        } = &mut *state;

        let display = displays.get_mut(&connector).filter(|d| d.connected())?;
        let mut ctx = DisplayContext {
            backend,
            crtcs,
            callback: callback.as_deref(),
            pending_primary: *primary,
        };
        Some(f(display.as_mut(), &mut ctx))
    }

    /// Refresh all known displays
    pub fn update(&self) {
        HotplugTarget::update(self.shared.as_ref());
    }

    /// Current compositor callback
    pub fn callback(&self) -> Option<Arc<dyn DrmCallback>> {
        self.shared.lock().callback.clone()
    }

    /// Start reporting to `callback`
    ///
    /// Only one display is reported here: the first connected internal
    /// panel, or failing that the first connected display. The others
    /// follow on `report_external()`.
    pub fn enable(&self, callback: Arc<dyn DrmCallback>) {
        {
            let mut state = self.shared.lock();
            self.shared.update_locked(&mut state);
            state.callback = Some(Arc::clone(&callback));

            let primary = state
                .displays
                .values()
                .find(|d| d.connected() && d.internal())
                .or_else(|| state.displays.values().find(|d| d.connected()))
                .map(|display| {
                    info!("Reporting display {} as primary display", display);
                    display.report(callback.as_ref());
                    display.id()
                });
            state.primary = primary;
        }

        self.hotplug_notifier().enable();
    }

    /// Report the connected displays skipped by `enable()`
    pub fn report_external(&self) {
        let mut state = self.shared.lock();
        let Some(primary) = state.primary.take() else {
            return;
        };
        let Some(callback) = state.callback.clone() else {
            return;
        };

        for display in state.displays.values() {
            if display.id() != primary && display.connected() {
                info!("Reporting external display {}", display);
                display.report(callback.as_ref());
            }
        }
    }

    /// Stop hotplug notification and turn off all displays
    ///
    /// Safe without a prior `enable()` and while an update is in flight.
    pub fn disable(&self) {
        self.hotplug_notifier().disable();

        let mut state = self.shared.lock();
        state.callback = None;
        if let Some(backend) = self.shared.backend.as_deref() {
            state.for_each_display(backend, |display, ctx| display.disable(ctx));
        }
    }

    fn hotplug_notifier(&self) -> MutexGuard<'_, Box<dyn HotplugNotifier>> {
        self.hotplug.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
