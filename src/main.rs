//! drmfb - display composer service
//!
//! Opens the configured DRM device, reports its displays and follows
//! hotplug events until SIGTERM/SIGINT/SIGHUP.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::sync::Arc;

use drmfb::composer::{Composer, PowerMode};
use drmfb::config::Config;
use drmfb::drm::{DeviceManager, LogCallback};

fn print_help() {
    println!("drmfb {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: drmfb [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -h, --help          Show this help");
    println!("  -V, --version       Show version");
    println!("      --print-config  Print the effective configuration and exit");
    println!();
    println!("Environment:");
    println!("  HWC_DRM_DEVICE      DRM device node (overrides hwc.drm.device)");
    println!("  RUST_LOG            Log filter (default: info)");
}

/// Block termination signals and return a signalfd for them
///
/// Must run before any thread is spawned so every thread inherits the mask.
fn termination_signals() -> Result<SignalFd> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGHUP);
    mask.thread_block().context("Failed to block signals")?;

    SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC).context("Failed to create signalfd")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("drmfb {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load();

    if args.iter().any(|a| a == "--print-config") {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("drmfb starting...");
    let mut signals = termination_signals()?;

    let device = DeviceManager::from_config(&config);
    let composer = Composer::new(device).ok_or_else(|| {
        anyhow!(
            "Failed to initialize DRM device {}",
            config.device_path().display()
        )
    })?;

    composer.register_event_callback(Arc::new(LogCallback));
    for display in composer.device().connected_displays() {
        if let Err(e) = composer.set_power_mode(display, PowerMode::On) {
            warn!("Failed to power on display {}: {}", display, e);
        }
    }

    // Notify systemd that we're ready
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    loop {
        match signals.read_signal() {
            Ok(Some(siginfo)) => {
                info!("Received signal {}, shutting down gracefully...", siginfo.ssi_signo);
                break;
            }
            Ok(None) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e).context("Failed to read signalfd"),
        }
    }

    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
    composer.unregister_event_callback();
    info!("drmfb stopped");
    Ok(())
}
