//! Device-wide tunables.
//!
//! Every timing constant the firmware uses lives here so tests can shrink
//! them. The WebSocket endpoint and client id can be overridden at build time
//! with the `AUDIO_LINK_WS_URL` and `AUDIO_LINK_CLIENT_ID` environment
//! variables.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Control-channel endpoint used when `AUDIO_LINK_WS_URL` is not set.
pub const DEFAULT_WS_URL: &str = "ws://192.168.1.100:8080/ws";

/// Client identity used when `AUDIO_LINK_CLIENT_ID` is not set.
pub const DEFAULT_CLIENT_ID: &str = "esp32s3-001";

/// Device type reported in the identity announcement.
pub const DEVICE_TYPE: &str = "esp32s3";

/// Name reported by the provisioning portal.
pub const DEVICE_NAME: &str = "ESP32-S3";

/// Address of the device while it runs the provisioning access point.
pub const AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Station retry limit.
pub const MAX_RETRY: u32 = 5;

/// Capacity of the interrupt-to-task button queue.
pub const BUTTON_QUEUE_CAPACITY: usize = 10;

/// Station-mode retry timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following one.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Control-channel session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base endpoint; the client id is appended as the last path segment.
    pub endpoint: String,
    /// Device identity.
    pub client_id: String,
    /// Delay between transport reconnect attempts.
    pub reconnect_interval: Duration,
    /// Transport network timeout.
    pub network_timeout: Duration,
    /// Transport keep-alive ping interval.
    pub ping_interval: Duration,
    /// How long the link must stay down before the next connect is
    /// announced with the "connected" clip again.
    pub first_connect_rearm: Duration,
    /// Grace period between acknowledging a remote restart and restarting.
    pub restart_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: option_env!("AUDIO_LINK_WS_URL")
                .unwrap_or(DEFAULT_WS_URL)
                .to_string(),
            client_id: option_env!("AUDIO_LINK_CLIENT_ID")
                .unwrap_or(DEFAULT_CLIENT_ID)
                .to_string(),
            reconnect_interval: Duration::from_secs(5),
            network_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(10),
            first_connect_rearm: Duration::from_secs(30),
            restart_grace: Duration::from_secs(3),
        }
    }
}

/// Audio capture format and buffer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channels.
    pub channels: u16,
    /// Bytes per sample per channel.
    pub bytes_per_sample: u16,
    /// Largest recording buffer ever requested.
    pub max_buffer: usize,
}

impl AudioConfig {
    /// PCM bytes produced per second of capture.
    pub const fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.bytes_per_sample as usize
    }

    /// Buffer size for a capture of `seconds`, capped at `max_buffer`.
    pub fn buffer_for(&self, seconds: u32) -> usize {
        self.bytes_per_second()
            .saturating_mul(seconds as usize)
            .min(self.max_buffer)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 2,
            bytes_per_sample: 2,
            max_buffer: 16_000 * 2 * 2 * 60,
        }
    }
}

/// Orchestrator and reset timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// How long to wait for the station to come up.
    pub wifi_connect_timeout: Duration,
    /// Poll interval while waiting for the portal to save credentials.
    pub config_poll_interval: Duration,
    /// Delay between the "saved" clip and the restart.
    pub saved_restart_delay: Duration,
    /// Delay before restarting from the error state.
    pub error_restart_delay: Duration,
    /// Interval of the session liveness check.
    pub liveness_interval: Duration,
    /// Pause between destroying a dead session and recreating it.
    pub session_recreate_delay: Duration,
    /// Hold time that qualifies a button press as a factory reset.
    pub reset_hold: Duration,
    /// Pause after wiping credentials before restarting.
    pub reset_settle_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wifi_connect_timeout: Duration::from_secs(30),
            config_poll_interval: Duration::from_secs(1),
            saved_restart_delay: Duration::from_secs(3),
            error_restart_delay: Duration::from_secs(3),
            liveness_interval: Duration::from_secs(1),
            session_recreate_delay: Duration::from_secs(1),
            reset_hold: Duration::from_millis(5000),
            reset_settle_delay: Duration::from_secs(1),
        }
    }
}

/// Complete device configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub timing: TimingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.session.first_connect_rearm, Duration::from_secs(30));
        assert_eq!(config.timing.wifi_connect_timeout, Duration::from_secs(30));
        assert_eq!(config.timing.reset_hold, Duration::from_secs(5));
        assert!(!config.session.client_id.is_empty());
    }

    #[test]
    fn test_audio_buffer_sizing() {
        let audio = AudioConfig::default();
        assert_eq!(audio.bytes_per_second(), 64_000);
        assert_eq!(audio.buffer_for(5), 320_000);
        assert_eq!(audio.buffer_for(60), audio.max_buffer);
        assert_eq!(audio.buffer_for(61), audio.max_buffer);
    }
}
