//! Composer front-end
//!
//! The compositor-facing entry points: callback registration, display
//! power control and simple display queries. Displays are addressed by
//! their display id, which is the connector id.

use log::info;
use std::sync::Arc;
use thiserror::Error;

use crate::drm::{ConnectorId, DeviceManager, DisplayId, DrmCallback};

/// Composer request failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ComposerError {
    #[error("unknown or disconnected display")]
    BadDisplay,
    #[error("no hardware resources available")]
    NoResources,
    #[error("operation not supported")]
    Unsupported,
}

pub type ComposerResult<T> = Result<T, ComposerError>;

/// Display power modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Off,
    Doze,
    DozeSuspend,
    On,
}

/// Display types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayType {
    Physical,
}

/// Composer over one DRM device
pub struct Composer {
    device: DeviceManager,
}

impl Composer {
    /// Initialize the device; None if that fails
    pub fn new(device: DeviceManager) -> Option<Self> {
        if !device.initialize() {
            return None;
        }
        Some(Self { device })
    }

    pub fn device(&self) -> &DeviceManager {
        &self.device
    }

    /// Client connected: start reporting displays
    pub fn register_event_callback(&self, callback: Arc<dyn DrmCallback>) {
        self.device.enable(callback);
    }

    /// Client gone: stop hotplug and turn everything off
    pub fn unregister_event_callback(&self) {
        info!("Client destroyed, disabling displays");
        self.device.disable();
    }

    pub fn set_power_mode(&self, display: DisplayId, mode: PowerMode) -> ComposerResult<()> {
        let connector = self.connected(display)?;

        match mode {
            PowerMode::Off => {
                self.device
                    .with_connected_display(connector, |display, ctx| display.disable(ctx))
                    .ok_or(ComposerError::BadDisplay)?;
                Ok(())
            }
            PowerMode::On => {
                // The first display turned on releases the ones held back by enable()
                self.device.report_external();
                let enabled = self
                    .device
                    .with_connected_display(connector, |display, ctx| display.enable(ctx))
                    .ok_or(ComposerError::BadDisplay)?;
                if enabled {
                    Ok(())
                } else {
                    Err(ComposerError::NoResources)
                }
            }
            PowerMode::Doze | PowerMode::DozeSuspend => Err(ComposerError::Unsupported),
        }
    }

    pub fn display_name(&self, display: DisplayId) -> ComposerResult<String> {
        let connector = connector_of(display)?;
        self.device
            .connected_display(connector, |display| display.name())
            .ok_or(ComposerError::BadDisplay)
    }

    pub fn display_type(&self, display: DisplayId) -> ComposerResult<DisplayType> {
        self.connected(display)?;
        Ok(DisplayType::Physical)
    }

    /// Virtual displays are not supported
    pub fn max_virtual_display_count(&self) -> u32 {
        0
    }

    fn connected(&self, display: DisplayId) -> ComposerResult<ConnectorId> {
        let connector = connector_of(display)?;
        self.device
            .connected_display(connector, |_| connector)
            .ok_or(ComposerError::BadDisplay)
    }
}

fn connector_of(display: DisplayId) -> ComposerResult<ConnectorId> {
    ConnectorId::try_from(display).map_err(|_| ComposerError::BadDisplay)
}
