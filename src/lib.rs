//! Connectivity and remote-control firmware for an ESP32-S3 audio appliance.
//!
//! Everything except the ESP-IDF bindings (behind the `esp32` feature) builds
//! and tests on the host.
//!
//! # Modules
//!
//! - [`device`] - boot state machine
//! - [`wifi`] - credential store and station / access-point switching
//! - [`portal`] - captive DNS and HTTP provisioning portal
//! - [`session`] - WebSocket control channel
//! - [`reset`] - factory-reset button
//! - [`audio`] - playback and capture front end
//! - [`status`] - shared connectivity bits

pub mod audio;
pub mod config;
pub mod device;
pub mod kv;
#[cfg(feature = "esp32")]
pub mod persistence;
pub mod persistence_host;
pub mod portal;
pub mod reset;
pub mod session;
pub mod status;
pub mod system;
pub mod timer;
pub mod wifi;

pub use config::{ConfigError, DeviceConfig, NetworkCredential};
pub use device::{DeviceError, DeviceState, Orchestrator};
pub use kv::{KvStore, StoreError};
pub use status::{StatusBits, StatusFlags};
pub use system::{RestartReason, Restarter};
