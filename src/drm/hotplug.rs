//! DRM hotplug detection
//!
//! Monitors udev events for DRM connector changes (monitor plug/unplug)
//! on a background thread and refreshes the device manager when one
//! arrives.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::{HOTPLUG_SUBSYSTEM, HOTPLUG_THREAD_NAME};

/// Starts and stops connector change notification
pub trait HotplugNotifier: Send {
    fn enable(&mut self);
    fn disable(&mut self);
}

/// Receiver of connector change notifications
pub trait HotplugTarget: Send + Sync {
    fn update(&self);
}

/// Non-owning handle to the object refreshed on hotplug
#[derive(Clone)]
pub struct HotplugHandle(Weak<dyn HotplugTarget>);

impl HotplugHandle {
    pub fn new(target: Weak<dyn HotplugTarget>) -> Self {
        Self(target)
    }

    /// Forward a hotplug event
    ///
    /// Returns false once the target is gone.
    pub fn update(&self) -> bool {
        match self.0.upgrade() {
            Some(target) => {
                target.update();
                true
            }
            None => false,
        }
    }
}

/// Notifier that never fires
#[derive(Debug, Default)]
pub struct NullNotifier;

impl HotplugNotifier for NullNotifier {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

/// Hotplug event types
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    /// A connector state changed (connect/disconnect/mode change)
    ConnectorChanged,
}

/// Blocking source of hotplug events polled by the worker thread
pub trait HotplugSource: Send {
    /// Wait up to `timeout` for a hotplug event
    fn wait(&mut self, timeout: Duration) -> Result<Option<HotplugEvent>>;
}

/// Opens the event source on the worker thread
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn HotplugSource>> + Send + Sync>;

/// udev-based hotplug monitor for DRM devices
pub struct HotplugMonitor {
    socket: udev::MonitorSocket,
}

impl HotplugMonitor {
    /// Create a new hotplug monitor for DRM subsystem
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor builder")?
            .match_subsystem(HOTPLUG_SUBSYSTEM)
            .context("Failed to match drm subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;

        info!("DRM hotplug monitor initialized");
        Ok(Self { socket })
    }

    /// Get the raw file descriptor for polling
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Check for hotplug events (non-blocking)
    ///
    /// Drains all pending events; returns Some(HotplugEvent) if any of
    /// them was a hotplug.
    pub fn poll(&mut self) -> Option<HotplugEvent> {
        let mut found = None;
        for event in self.socket.iter() {
            // Only "change" actions with HOTPLUG=1
            if event.action().map(|a| a == "change").unwrap_or(false)
                && event
                    .property_value("HOTPLUG")
                    .map(|v| v == "1")
                    .unwrap_or(false)
            {
                debug!("DRM hotplug event: {:?}", event.devpath().to_string_lossy());
                found = Some(HotplugEvent::ConnectorChanged);
            }
        }
        found
    }
}

impl HotplugSource for HotplugMonitor {
    fn wait(&mut self, timeout: Duration) -> Result<Option<HotplugEvent>> {
        use nix::errno::Errno;
        use nix::poll::{poll, PollFd, PollFlags};

        let fd = unsafe { BorrowedFd::borrow_raw(self.as_raw_fd()) };
        let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        match poll(&mut fds, timeout_ms) {
            Ok(0) | Err(Errno::EINTR) => Ok(None),
            Ok(_) => Ok(self.poll()),
            Err(e) => Err(e).context("Failed to poll udev monitor"),
        }
    }
}

#[derive(Debug, Default)]
struct Flags {
    /// Worker should forward events
    enabled: bool,
    /// Worker thread exists and should keep running
    started: bool,
}

#[derive(Default)]
struct Control {
    flags: Mutex<Flags>,
    condition: Condvar,
}

impl Control {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background thread forwarding udev hotplug events
///
/// The thread is spawned on the first `enable()`, and again on a later
/// `enable()` if it exited on its own. `disable()` only parks it; dropping
/// the notifier stops and joins it.
pub struct HotplugThread {
    target: HotplugHandle,
    poll_timeout: Duration,
    open: SourceFactory,
    control: Arc<Control>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugThread {
    /// Worker listening on udev
    pub fn new(target: HotplugHandle, poll_timeout: Duration) -> Self {
        Self::with_source(target, poll_timeout, || {
            Ok(Box::new(HotplugMonitor::new()?) as Box<dyn HotplugSource>)
        })
    }

    /// Worker listening on the source returned by `open`
    pub fn with_source<F>(target: HotplugHandle, poll_timeout: Duration, open: F) -> Self
    where
        F: Fn() -> Result<Box<dyn HotplugSource>> + Send + Sync + 'static,
    {
        Self {
            target,
            poll_timeout,
            open: Arc::new(open),
            control: Arc::new(Control::default()),
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.control.lock().started
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        {
            let mut flags = self.control.lock();
            flags.enabled = false;
            flags.started = false;
        }

        self.control.condition.notify_all();
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Hotplug thread panicked");
            }
        }
    }

    fn spawn(&mut self) {
        // A previous worker that gave up has already cleared `started`
        self.join();

        let control = Arc::clone(&self.control);
        let target = self.target.clone();
        let open = Arc::clone(&self.open);
        let timeout = self.poll_timeout;

        match std::thread::Builder::new()
            .name(HOTPLUG_THREAD_NAME.to_string())
            .spawn(move || {
                run(&control, &target, open.as_ref(), timeout);
                control.lock().started = false;
            })
        {
            Ok(thread) => self.thread = Some(thread),
            Err(e) => {
                warn!("Failed to spawn hotplug thread: {}", e);
                let mut flags = self.control.lock();
                flags.started = false;
                flags.enabled = false;
            }
        }
    }
}

impl HotplugNotifier for HotplugThread {
    fn enable(&mut self) {
        {
            let mut flags = self.control.lock();
            flags.enabled = true;

            if !flags.started {
                flags.started = true;
                drop(flags);
                self.spawn();
                return;
            }
        }

        self.control.condition.notify_all();
    }

    fn disable(&mut self) {
        self.control.lock().enabled = false;
    }
}

impl Drop for HotplugThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    control: &Control,
    target: &HotplugHandle,
    open: &(dyn Fn() -> Result<Box<dyn HotplugSource>> + Send + Sync),
    timeout: Duration,
) {
    debug!("Starting thread {}", HOTPLUG_THREAD_NAME);

    let mut monitor = match open() {
        Ok(monitor) => monitor,
        Err(e) => {
            warn!("Hotplug monitor unavailable: {:#}", e);
            return;
        }
    };

    loop {
        {
            let flags = control
                .condition
                .wait_while(control.lock(), |f| f.started && !f.enabled)
                .unwrap_or_else(PoisonError::into_inner);
            if !flags.started {
                break;
            }
        }

        match monitor.wait(timeout) {
            Ok(Some(HotplugEvent::ConnectorChanged)) => {
                // Events seen while disabled are dropped
                if !control.lock().enabled {
                    continue;
                }
                if !target.update() {
                    debug!("Hotplug target dropped");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Hotplug monitor failed: {:#}", e);
                break;
            }
        }
    }

    debug!("Stopping thread {}", HOTPLUG_THREAD_NAME);
}
