//! Station / access-point mode switching.
//!
//! The retry logic lives in [`StationMachine`], a pure state machine fed with
//! [`StationEvent`]s. [`NetworkModeManager`] owns a [`WifiDriver`], runs the
//! machine on its own event thread and publishes the outcome through the
//! shared [`StatusFlags`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use audio_link_esp32::config::RetryConfig;
//! use audio_link_esp32::wifi::{DisconnectReason, StationAction, StationEvent, StationMachine};
//!
//! let mut machine = StationMachine::new(RetryConfig::default());
//! machine.begin_station();
//! assert_eq!(machine.on_event(StationEvent::Started), StationAction::Connect);
//! assert_eq!(
//!     machine.on_event(StationEvent::Disconnected(DisconnectReason::NoApFound)),
//!     StationAction::ReconnectAfter(Duration::from_millis(500)),
//! );
//! ```

use super::ap::AccessPointConfig;
use crate::config::{NetworkCredential, RetryConfig};
use crate::status::{StatusBits, StatusFlags};
use log::{debug, error, info, warn};
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Stack size for the Wi-Fi event thread.
const EVENT_THREAD_STACK_SIZE: usize = 4096;

/// Why the station lost (or never got) its association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    AuthExpired,
    AuthFailed,
    NoApFound,
    AssocFailed,
    HandshakeTimeout,
    Other(u16),
}

impl DisconnectReason {
    /// Decode an 802.11 / ESP-IDF reason code.
    pub fn from_code(code: u16) -> Self {
        match code {
            2 => Self::AuthExpired,
            201 => Self::NoApFound,
            202 => Self::AuthFailed,
            203 => Self::AssocFailed,
            204 => Self::HandshakeTimeout,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthExpired => write!(f, "authentication expired"),
            Self::AuthFailed => write!(f, "authentication failed (wrong password?)"),
            Self::NoApFound => write!(f, "access point not found"),
            Self::AssocFailed => write!(f, "association failed"),
            Self::HandshakeTimeout => write!(f, "handshake timeout"),
            Self::Other(code) => write!(f, "reason {}", code),
        }
    }
}

/// Driver-level station events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEvent {
    /// Station interface started.
    Started,
    /// Association lost or refused.
    Disconnected(DisconnectReason),
    /// DHCP assigned an address.
    GotIp(Ipv4Addr),
    /// The address was withdrawn.
    LostIp,
}

/// What the event thread must do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationAction {
    None,
    Connect,
    ReconnectAfter(Duration),
    Connected(Ipv4Addr),
    Failed,
}

/// Current network mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Disabled,
    StationConnecting,
    StationConnected,
    StationFailed,
    AccessPointActive,
}

/// Delay before retry number `attempt` (zero-based): `base * 2^attempt`,
/// capped at `max_delay`.
pub fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    config
        .base_delay
        .checked_mul(factor)
        .map_or(config.max_delay, |d| d.min(config.max_delay))
}

/// Station retry state machine.
#[derive(Debug, Clone)]
pub struct StationMachine {
    retry: RetryConfig,
    retries: u32,
    mode: NetworkMode,
}

impl StationMachine {
    /// Create a machine in [`NetworkMode::Disabled`].
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            retries: 0,
            mode: NetworkMode::Disabled,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    /// Retries issued since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Enter a fresh station connection attempt.
    pub fn begin_station(&mut self) {
        self.retries = 0;
        self.mode = NetworkMode::StationConnecting;
    }

    /// Switch to access-point mode; station events are ignored from now on.
    pub fn enter_access_point(&mut self) {
        self.mode = NetworkMode::AccessPointActive;
    }

    /// Interface stopped.
    pub fn disable(&mut self) {
        self.mode = NetworkMode::Disabled;
    }

    /// Apply one event.
    pub fn on_event(&mut self, event: StationEvent) -> StationAction {
        let station_active = matches!(
            self.mode,
            NetworkMode::StationConnecting | NetworkMode::StationConnected
        );

        match event {
            StationEvent::Started if station_active => {
                self.retries = 0;
                StationAction::Connect
            }
            StationEvent::Disconnected(reason) if station_active => {
                warn!("Station disconnected: {}", reason);
                if self.retries < self.retry.max_retries {
                    let delay = retry_delay(&self.retry, self.retries);
                    self.retries += 1;
                    self.mode = NetworkMode::StationConnecting;
                    info!(
                        "Retrying connection ({}/{}) in {} ms",
                        self.retries,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    StationAction::ReconnectAfter(delay)
                } else {
                    self.mode = NetworkMode::StationFailed;
                    StationAction::Failed
                }
            }
            StationEvent::GotIp(ip) if station_active => {
                self.retries = 0;
                self.mode = NetworkMode::StationConnected;
                StationAction::Connected(ip)
            }
            StationEvent::LostIp => {
                warn!("Station lost its IP address");
                StationAction::None
            }
            other => {
                debug!("Ignoring {:?} in mode {:?}", other, self.mode);
                StationAction::None
            }
        }
    }
}

/// Address and network of the connected station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationInfo {
    pub ip: Ipv4Addr,
    pub ssid: String,
}

/// Result of [`NetworkModeManager::wait_connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Connected,
    Failed,
    TimedOut,
}

/// Radio driver operations used by the manager.
///
/// Drivers report asynchronous events through a [`StationEventSink`]
/// obtained from [`NetworkModeManager::event_sink`].
pub trait WifiDriver: Send {
    /// Configure station mode with `credential` and start the interface.
    fn start_station(&mut self, credential: &NetworkCredential) -> Result<(), WifiError>;

    /// Issue an association request.
    fn connect(&mut self) -> Result<(), WifiError>;

    /// Configure and start the provisioning access point.
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError>;

    /// Stop whichever interface is running.
    fn stop(&mut self) -> Result<(), WifiError>;

    /// Factory MAC address.
    fn mac_address(&self) -> Result<[u8; 6], WifiError>;

    /// Address and SSID while associated.
    fn station_info(&self) -> Option<StationInfo>;
}

/// Channel end drivers push [`StationEvent`]s into.
pub type StationEventSink = Sender<StationEvent>;

/// Errors that can occur during Wi-Fi operations.
#[derive(Debug)]
pub enum WifiError {
    /// SSID does not fit the driver's configuration field.
    InvalidSsid,
    /// Password does not fit the driver's configuration field.
    InvalidPassword,
    /// The event thread could not be spawned.
    Spawn(io::Error),
    /// Driver-specific failure.
    Driver(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for WifiError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Spawn(e) => write!(f, "failed to spawn event thread: {}", e),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for WifiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns the radio driver and switches between station and access-point mode.
pub struct NetworkModeManager<D: WifiDriver + 'static> {
    driver: Arc<Mutex<D>>,
    machine: Arc<Mutex<StationMachine>>,
    flags: Arc<StatusFlags>,
    sink: StationEventSink,
}

impl<D: WifiDriver + 'static> NetworkModeManager<D> {
    /// Take ownership of `driver` and start the event thread.
    pub fn new(driver: D, flags: Arc<StatusFlags>, retry: RetryConfig) -> Result<Self, WifiError> {
        let driver = Arc::new(Mutex::new(driver));
        let machine = Arc::new(Mutex::new(StationMachine::new(retry)));
        let (sink, events) = mpsc::channel();

        let worker_driver = driver.clone();
        let worker_machine = machine.clone();
        let worker_flags = flags.clone();
        thread::Builder::new()
            .name("wifi-events".into())
            .stack_size(EVENT_THREAD_STACK_SIZE)
            .spawn(move || run_events(events, worker_driver, worker_machine, worker_flags))
            .map_err(WifiError::Spawn)?;

        Ok(Self {
            driver,
            machine,
            flags,
            sink,
        })
    }

    /// A sink the driver's event callbacks feed.
    pub fn event_sink(&self) -> StationEventSink {
        self.sink.clone()
    }

    /// Current mode.
    pub fn mode(&self) -> NetworkMode {
        lock(&self.machine).mode()
    }

    /// Start station mode with `credential`.
    ///
    /// Returns once the driver accepted the configuration; use
    /// [`wait_connected`](Self::wait_connected) for the outcome.
    pub fn start_station(&self, credential: &NetworkCredential) -> Result<(), WifiError> {
        info!("Starting station mode for SSID {}", credential.ssid());
        self.flags
            .clear(StatusBits::WIFI_CONNECTED | StatusBits::WIFI_FAIL);
        lock(&self.machine).begin_station();
        lock(&self.driver).start_station(credential)
    }

    /// Block until the station is connected, has failed or `timeout` elapses.
    pub fn wait_connected(&self, timeout: Duration) -> WaitOutcome {
        let hit = self.flags.wait_any(
            StatusBits::WIFI_CONNECTED | StatusBits::WIFI_FAIL,
            timeout,
        );
        if hit.contains(StatusBits::WIFI_CONNECTED) {
            WaitOutcome::Connected
        } else if hit.contains(StatusBits::WIFI_FAIL) {
            WaitOutcome::Failed
        } else {
            WaitOutcome::TimedOut
        }
    }

    /// Start the open provisioning access point named after the device MAC.
    pub fn start_access_point(&self) -> Result<AccessPointConfig, WifiError> {
        let mac = self.mac_address()?;
        let config = AccessPointConfig::for_mac(mac);
        self.start_access_point_with(&config)?;
        Ok(config)
    }

    /// Start the provisioning access point with an explicit configuration.
    pub fn start_access_point_with(&self, config: &AccessPointConfig) -> Result<(), WifiError> {
        lock(&self.machine).enter_access_point();
        self.flags.clear(StatusBits::WIFI_CONNECTED);
        let mut driver = lock(&self.driver);
        // A failed station may still be running.
        driver.stop()?;
        driver.start_access_point(config)?;
        info!(
            "Access point {} started ({}, channel {})",
            config.ssid,
            if config.is_open() { "open" } else { "WPA2" },
            config.channel
        );
        Ok(())
    }

    /// Stop the radio.
    pub fn stop(&self) -> Result<(), WifiError> {
        lock(&self.machine).disable();
        self.flags.clear(StatusBits::WIFI_CONNECTED);
        lock(&self.driver).stop()?;
        info!("Wi-Fi stopped");
        Ok(())
    }

    /// Factory MAC address.
    pub fn mac_address(&self) -> Result<[u8; 6], WifiError> {
        lock(&self.driver).mac_address()
    }

    /// Address and SSID while associated.
    pub fn station_info(&self) -> Option<StationInfo> {
        if self.mode() != NetworkMode::StationConnected {
            return None;
        }
        lock(&self.driver).station_info()
    }

    /// Run a closure against the driver.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut lock(&self.driver))
    }
}

fn run_events<D: WifiDriver>(
    events: Receiver<StationEvent>,
    driver: Arc<Mutex<D>>,
    machine: Arc<Mutex<StationMachine>>,
    flags: Arc<StatusFlags>,
) {
    for event in events {
        let action = lock(&machine).on_event(event);
        match action {
            StationAction::None => {}
            StationAction::Connect => connect(&driver),
            StationAction::ReconnectAfter(delay) => {
                flags.clear(StatusBits::WIFI_CONNECTED);
                thread::sleep(delay);
                // Mode may have changed while we slept.
                if lock(&machine).mode() == NetworkMode::StationConnecting {
                    connect(&driver);
                }
            }
            StationAction::Connected(ip) => {
                info!("Station got IP {}", ip);
                flags.clear(StatusBits::WIFI_FAIL);
                flags.set(StatusBits::WIFI_CONNECTED);
            }
            StationAction::Failed => {
                error!("Station connection failed after all retries");
                flags.clear(StatusBits::WIFI_CONNECTED);
                flags.set(StatusBits::WIFI_FAIL);
            }
        }
    }
    debug!("Wi-Fi event thread exiting");
}

fn connect<D: WifiDriver>(driver: &Mutex<D>) {
    if let Err(e) = lock(driver).connect() {
        warn!("Connect request failed: {}", e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Instant;

    /// Calls recorded by [`FakeDriver`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DriverCall {
        StartStation(String),
        Connect,
        StartAccessPoint(String),
        Stop,
    }

    /// Driver double that records every call.
    #[derive(Default)]
    pub struct FakeDriver {
        pub calls: Arc<Mutex<Vec<DriverCall>>>,
    }

    impl FakeDriver {
        pub fn count(&self, call: &DriverCall) -> usize {
            lock(&self.calls).iter().filter(|c| *c == call).count()
        }
    }

    impl WifiDriver for FakeDriver {
        fn start_station(&mut self, credential: &NetworkCredential) -> Result<(), WifiError> {
            lock(&self.calls).push(DriverCall::StartStation(credential.ssid().to_string()));
            Ok(())
        }

        fn connect(&mut self) -> Result<(), WifiError> {
            lock(&self.calls).push(DriverCall::Connect);
            Ok(())
        }

        fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
            lock(&self.calls).push(DriverCall::StartAccessPoint(config.ssid.clone()));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), WifiError> {
            lock(&self.calls).push(DriverCall::Stop);
            Ok(())
        }

        fn mac_address(&self) -> Result<[u8; 6], WifiError> {
            Ok([0x24, 0x0a, 0xc4, 0xab, 0xcd, 0xef])
        }

        fn station_info(&self) -> Option<StationInfo> {
            Some(StationInfo {
                ip: Ipv4Addr::new(10, 0, 0, 7),
                ssid: "home".into(),
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(DisconnectReason::from_code(2), DisconnectReason::AuthExpired);
        assert_eq!(DisconnectReason::from_code(202), DisconnectReason::AuthFailed);
        assert_eq!(DisconnectReason::from_code(201), DisconnectReason::NoApFound);
        assert_eq!(DisconnectReason::from_code(203), DisconnectReason::AssocFailed);
        assert_eq!(
            DisconnectReason::from_code(204),
            DisconnectReason::HandshakeTimeout
        );
        assert_eq!(DisconnectReason::from_code(8), DisconnectReason::Other(8));
    }

    #[test]
    fn test_retry_delays_double_and_cap() {
        let config = RetryConfig::default();
        let delays: Vec<u128> = (0..7)
            .map(|n| retry_delay(&config, n).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000, 8000]);
        assert_eq!(retry_delay(&config, 40), Duration::from_secs(8));
    }

    #[test]
    fn test_machine_retries_then_fails() {
        let mut machine = StationMachine::new(RetryConfig::default());
        machine.begin_station();
        assert_eq!(machine.on_event(StationEvent::Started), StationAction::Connect);

        let mut last = Duration::ZERO;
        for n in 1..=5 {
            match machine.on_event(StationEvent::Disconnected(DisconnectReason::AuthFailed)) {
                StationAction::ReconnectAfter(delay) => {
                    assert!(delay >= last);
                    last = delay;
                }
                other => panic!("unexpected action {:?}", other),
            }
            assert_eq!(machine.retries(), n);
        }

        assert_eq!(
            machine.on_event(StationEvent::Disconnected(DisconnectReason::AuthFailed)),
            StationAction::Failed
        );
        assert_eq!(machine.mode(), NetworkMode::StationFailed);
        assert!(machine.retries() <= 5);

        // Further events are ignored once failed.
        assert_eq!(
            machine.on_event(StationEvent::Disconnected(DisconnectReason::AuthFailed)),
            StationAction::None
        );
    }

    #[test]
    fn test_got_ip_resets_retry_counter() {
        let mut machine = StationMachine::new(RetryConfig::default());
        machine.begin_station();
        machine.on_event(StationEvent::Started);
        machine.on_event(StationEvent::Disconnected(DisconnectReason::NoApFound));
        machine.on_event(StationEvent::Disconnected(DisconnectReason::NoApFound));
        assert_eq!(machine.retries(), 2);

        let ip = Ipv4Addr::new(192, 168, 1, 20);
        assert_eq!(
            machine.on_event(StationEvent::GotIp(ip)),
            StationAction::Connected(ip)
        );
        assert_eq!(machine.retries(), 0);
        assert_eq!(machine.mode(), NetworkMode::StationConnected);

        // A later drop starts again from the first delay.
        assert_eq!(
            machine.on_event(StationEvent::Disconnected(DisconnectReason::AuthExpired)),
            StationAction::ReconnectAfter(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_lost_ip_is_not_a_retry() {
        let mut machine = StationMachine::new(RetryConfig::default());
        machine.begin_station();
        machine.on_event(StationEvent::GotIp(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(machine.on_event(StationEvent::LostIp), StationAction::None);
        assert_eq!(machine.retries(), 0);
    }

    #[test]
    fn test_station_events_ignored_in_ap_mode() {
        let mut machine = StationMachine::new(RetryConfig::default());
        machine.enter_access_point();
        assert_eq!(machine.on_event(StationEvent::Started), StationAction::None);
        assert_eq!(
            machine.on_event(StationEvent::Disconnected(DisconnectReason::Other(1))),
            StationAction::None
        );
    }

    #[test]
    fn test_manager_connects() {
        let flags = Arc::new(StatusFlags::new());
        let manager =
            NetworkModeManager::new(FakeDriver::default(), flags.clone(), fast_retry()).unwrap();
        let sink = manager.event_sink();
        let cred = NetworkCredential::new("home", "secret123").unwrap();

        manager.start_station(&cred).unwrap();
        sink.send(StationEvent::Started).unwrap();
        sink.send(StationEvent::GotIp(Ipv4Addr::new(10, 0, 0, 7)))
            .unwrap();

        assert_eq!(
            manager.wait_connected(Duration::from_secs(5)),
            WaitOutcome::Connected
        );
        assert_eq!(manager.mode(), NetworkMode::StationConnected);
        assert_eq!(manager.station_info().unwrap().ssid, "home");
        manager.with_driver(|d| {
            assert_eq!(d.count(&DriverCall::StartStation("home".into())), 1);
            assert_eq!(d.count(&DriverCall::Connect), 1);
        });
    }

    #[test]
    fn test_manager_fails_after_max_retries() {
        let flags = Arc::new(StatusFlags::new());
        let manager =
            NetworkModeManager::new(FakeDriver::default(), flags.clone(), fast_retry()).unwrap();
        let sink = manager.event_sink();
        let cred = NetworkCredential::new("home", "wrong").unwrap();

        manager.start_station(&cred).unwrap();
        sink.send(StationEvent::Started).unwrap();
        for _ in 0..6 {
            sink.send(StationEvent::Disconnected(DisconnectReason::AuthFailed))
                .unwrap();
        }

        assert_eq!(
            manager.wait_connected(Duration::from_secs(5)),
            WaitOutcome::Failed
        );
        // Initial connect plus exactly five retries.
        assert!(wait_until(|| manager.with_driver(|d| d.count(&DriverCall::Connect)) == 6));
        assert!(flags.is_set(StatusBits::WIFI_FAIL));
        assert!(!flags.is_set(StatusBits::WIFI_CONNECTED));
    }

    #[test]
    fn test_wait_connected_times_out() {
        let flags = Arc::new(StatusFlags::new());
        let manager =
            NetworkModeManager::new(FakeDriver::default(), flags, fast_retry()).unwrap();
        let cred = NetworkCredential::new("home", "").unwrap();
        manager.start_station(&cred).unwrap();
        assert_eq!(
            manager.wait_connected(Duration::from_millis(20)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_access_point_uses_mac_ssid() {
        let flags = Arc::new(StatusFlags::new());
        let manager =
            NetworkModeManager::new(FakeDriver::default(), flags, fast_retry()).unwrap();

        let config = manager.start_access_point().unwrap();
        assert_eq!(config.ssid, "ESP32-S3-Config-ABCDEF");
        assert_eq!(manager.mode(), NetworkMode::AccessPointActive);
        assert!(manager.station_info().is_none());
        manager.with_driver(|d| {
            assert_eq!(
                d.count(&DriverCall::StartAccessPoint("ESP32-S3-Config-ABCDEF".into())),
                1
            );
        });

        manager.stop().unwrap();
        assert_eq!(manager.mode(), NetworkMode::Disabled);
    }
}
