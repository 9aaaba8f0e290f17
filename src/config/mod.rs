//! Device configuration.
//!
//! # Components
//!
//! - [`wifi`] - station credential types and validation (host-testable)
//! - [`device`] - timing, audio and endpoint tunables

pub mod device;
mod wifi;

pub use device::{AudioConfig, DeviceConfig, RetryConfig, SessionConfig, TimingConfig};
pub use wifi::{
    validate_parts, ConfigError, NetworkCredential, MAX_PASSWORD_LEN, MAX_SSID_LEN,
};
