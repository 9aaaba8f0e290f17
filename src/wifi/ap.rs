//! Provisioning access point settings.

use crate::config::device::AP_IP;
use std::net::Ipv4Addr;

/// Prefix of the provisioning network name.
pub const AP_SSID_PREFIX: &str = "ESP32-S3-Config-";

/// Channel used by the provisioning access point.
pub const AP_CHANNEL: u8 = 1;

/// Maximum number of stations joined at once.
pub const AP_MAX_CONNECTIONS: u16 = 4;

/// Build the provisioning SSID from the device MAC: the prefix followed by
/// the last three bytes as upper-case hex.
///
/// # Example
///
/// ```
/// use audio_link_esp32::wifi::ap_ssid;
///
/// let ssid = ap_ssid([0x24, 0x0a, 0xc4, 0x1a, 0x2b, 0x3c]);
/// assert_eq!(ssid, "ESP32-S3-Config-1A2B3C");
/// ```
pub fn ap_ssid(mac: [u8; 6]) -> String {
    format!(
        "{}{:02X}{:02X}{:02X}",
        AP_SSID_PREFIX, mac[3], mac[4], mac[5]
    )
}

/// Access point configuration handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    /// Empty for an open network.
    pub password: String,
    pub channel: u8,
    pub max_connections: u16,
    pub ip: Ipv4Addr,
}

impl AccessPointConfig {
    /// Open provisioning network named after `mac`.
    pub fn for_mac(mac: [u8; 6]) -> Self {
        Self {
            ssid: ap_ssid(mac),
            password: String::new(),
            channel: AP_CHANNEL,
            max_connections: AP_MAX_CONNECTIONS,
            ip: AP_IP,
        }
    }

    /// Require WPA2-Personal with `password`.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Check whether stations can join without a passphrase.
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}
