//! Wi-Fi mode management and credential storage.
//!
//! # Components
//!
//! - [`store`] - persistent station credentials over any [`KvStore`](crate::kv::KvStore)
//! - [`manager`] - station retry state machine and mode switching (host-testable)
//! - [`ap`] - provisioning access point settings
//! - `connection` - ESP-IDF Wi-Fi driver (ESP32 only)

pub mod ap;
pub mod manager;
pub mod store;

#[cfg(feature = "esp32")]
mod connection;

pub use ap::{ap_ssid, AccessPointConfig};
pub use manager::{
    retry_delay, DisconnectReason, NetworkMode, NetworkModeManager, StationAction, StationEvent,
    StationEventSink, StationInfo, StationMachine, WaitOutcome, WifiDriver, WifiError,
};
pub use store::CredentialStore;

#[cfg(feature = "esp32")]
pub use connection::{subscribe_station_events, EspWifiDriver, EventSubscriptions};
