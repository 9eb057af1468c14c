//! drmfb - DRM/KMS display adapter core
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          Composer (callback, power)      │
//! ├──────────────────────────────────────────┤
//! │  DeviceManager  ←  HotplugThread (udev)  │
//! │     │                                    │
//! │     ├── CrtcAllocator (pipe ownership)   │
//! │     └── Display per connector            │
//! │                          ↓               │
//! │              DRM/KMS (Card)              │
//! └──────────────────────────────────────────┘
//! ```

pub mod composer;
pub mod config;
pub mod constants;
pub mod drm;
