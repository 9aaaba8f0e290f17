use super::{DeviceError, DeviceState};
use crate::audio::clips::{CLIP_CONFIG_SAVED, CLIP_DEFAULT, CLIP_PROVISIONING};
use crate::audio::AudioControl;
use crate::config::{DeviceConfig, NetworkCredential};
use crate::kv::KvStore;
use crate::portal::{CaptivePortal, PortalContext, DNS_PORT, HTTP_PORT};
use crate::reset::{ButtonSource, ResetAction, ResetMonitor};
use crate::session::{Connector, SessionClient, SessionError};
use crate::status::{StatusBits, StatusFlags};
use crate::system::{RestartReason, Restarter};
use crate::wifi::{CredentialStore, NetworkModeManager, WaitOutcome, WifiDriver};
use log::{error, info, warn};
use std::sync::Arc;
use std::thread;

/// Ports the captive portal listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalPorts {
    pub dns: u16,
    pub http: u16,
}

impl Default for PortalPorts {
    fn default() -> Self {
        Self {
            dns: DNS_PORT,
            http: HTTP_PORT,
        }
    }
}

/// Boot state machine.
///
/// [`run`](Self::run) only returns when the device should restart; the
/// caller performs the restart.
pub struct Orchestrator<S, D, C>
where
    S: KvStore + 'static,
    D: WifiDriver + 'static,
    C: Connector,
{
    config: DeviceConfig,
    flags: Arc<StatusFlags>,
    credentials: Arc<CredentialStore<S>>,
    wifi: Arc<NetworkModeManager<D>>,
    audio: Arc<dyn AudioControl>,
    restarter: Arc<dyn Restarter>,
    connector: Option<C>,
    button: Option<Box<dyn ButtonSource>>,
    ports: PortalPorts,
    state: DeviceState,
    credential: Option<NetworkCredential>,
    session: Option<SessionClient<C>>,
    reset: Option<ResetMonitor>,
}

impl<S, D, C> Orchestrator<S, D, C>
where
    S: KvStore + 'static,
    D: WifiDriver + 'static,
    C: Connector,
    C::Transport: 'static,
{
    pub fn new(
        config: DeviceConfig,
        flags: Arc<StatusFlags>,
        credentials: Arc<CredentialStore<S>>,
        wifi: Arc<NetworkModeManager<D>>,
        connector: C,
        audio: Arc<dyn AudioControl>,
        restarter: Arc<dyn Restarter>,
    ) -> Self {
        Self {
            config,
            flags,
            credentials,
            wifi,
            audio,
            restarter,
            connector: Some(connector),
            button: None,
            ports: PortalPorts::default(),
            state: DeviceState::Init,
            credential: None,
            session: None,
            reset: None,
        }
    }

    /// Watch `source` for factory-reset holds once [`Init`](DeviceState::Init) runs.
    pub fn with_reset_button(mut self, source: impl ButtonSource) -> Self {
        self.button = Some(Box::new(source));
        self
    }

    pub fn with_portal_ports(mut self, ports: PortalPorts) -> Self {
        self.ports = ports;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Check whether the factory-reset monitor is running.
    pub fn reset_armed(&self) -> bool {
        self.reset.is_some()
    }

    /// Check whether the session transport reports an open socket.
    pub fn session_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Run until a restart is due.
    pub fn run(&mut self) -> RestartReason {
        loop {
            match self.step() {
                Ok(Some(reason)) => return reason,
                Ok(None) => {}
                Err(e) => {
                    error!("{} failed: {}", self.state, e);
                    self.state = DeviceState::Error;
                }
            }
        }
    }

    /// Run the current state once.
    ///
    /// `SessionActive` performs a single liveness check per call.
    pub fn step(&mut self) -> Result<Option<RestartReason>, DeviceError> {
        match self.state {
            DeviceState::Init => self.init()?,
            DeviceState::WifiConfig => return self.provision().map(Some),
            DeviceState::WifiConnecting => self.connect_station()?,
            DeviceState::WifiConnected => self.start_session()?,
            DeviceState::SessionActive => self.supervise(),
            DeviceState::Error => {
                thread::sleep(self.config.timing.error_restart_delay);
                return Ok(Some(RestartReason::InitFailure));
            }
        }
        Ok(None)
    }

    fn enter(&mut self, state: DeviceState) {
        info!("State {} -> {}", self.state, state);
        self.state = state;
    }

    fn play(&self, clip: u8) {
        if let Err(e) = self.audio.play_clip(clip) {
            warn!("Failed to play clip {}: {}", clip, e);
        }
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        if let Err(e) = self.audio.ensure_playback() {
            warn!("Audio playback unavailable: {}", e);
        }

        if let Some(source) = self.button.take() {
            let action = ResetAction {
                network: self.wifi.clone(),
                credentials: self.credentials.clone(),
                flags: self.flags.clone(),
                audio: self.audio.clone(),
                restarter: self.restarter.clone(),
                settle_delay: self.config.timing.reset_settle_delay,
            };
            self.reset = Some(ResetMonitor::start(source, &self.config.timing, action)?);
        }

        match self.credentials.has_valid() {
            Some(credential) => {
                info!("Found stored credentials for {}", credential.ssid());
                self.credential = Some(credential);
                self.enter(DeviceState::WifiConnecting);
            }
            None => {
                info!("No stored credentials");
                self.play(CLIP_DEFAULT);
                self.enter(DeviceState::WifiConfig);
            }
        }
        Ok(())
    }

    fn provision(&mut self) -> Result<RestartReason, DeviceError> {
        self.play(CLIP_PROVISIONING);
        self.flags.clear(StatusBits::CONFIG_SAVED);

        let ap = self.wifi.start_access_point()?;
        let ctx = PortalContext::new(
            self.credentials.clone(),
            self.flags.clone(),
            self.wifi.mac_address()?,
        );
        let mut portal = CaptivePortal::start(Arc::new(ctx), self.ports.dns, self.ports.http)?;
        info!("Provisioning: join {} and open http://{}/", ap.ssid, ap.ip);

        while !self
            .flags
            .wait_any(StatusBits::CONFIG_SAVED, self.config.timing.config_poll_interval)
            .contains(StatusBits::CONFIG_SAVED)
        {}

        info!("Credentials saved");
        self.play(CLIP_CONFIG_SAVED);
        thread::sleep(self.config.timing.saved_restart_delay);
        portal.stop();
        Ok(RestartReason::ConfigSaved)
    }

    fn connect_station(&mut self) -> Result<(), DeviceError> {
        let Some(credential) = self.credential.take() else {
            self.enter(DeviceState::WifiConfig);
            return Ok(());
        };
        if let Err(e) = self.wifi.start_station(&credential) {
            warn!("Station start failed: {}", e);
            self.enter(DeviceState::WifiConfig);
            return Ok(());
        }

        match self.wifi.wait_connected(self.config.timing.wifi_connect_timeout) {
            WaitOutcome::Connected => {
                if let Some(info) = self.wifi.station_info() {
                    info!("Connected to {} as {}", info.ssid, info.ip);
                }
                self.enter(DeviceState::WifiConnected);
            }
            outcome => {
                warn!("Station connection {:?}, falling back to provisioning", outcome);
                self.enter(DeviceState::WifiConfig);
            }
        }
        Ok(())
    }

    fn start_session(&mut self) -> Result<(), DeviceError> {
        if self.session.is_none() {
            let Some(connector) = self.connector.take() else {
                return Err(SessionError::Connect("connector already consumed".into()).into());
            };
            self.session = Some(SessionClient::new(
                connector,
                self.config.session.clone(),
                self.flags.clone(),
                self.audio.clone(),
                self.restarter.clone(),
            )?);
        }
        if let Some(session) = self.session.as_mut() {
            session.start()?;
        }
        self.enter(DeviceState::SessionActive);
        Ok(())
    }

    fn supervise(&mut self) {
        thread::sleep(self.config.timing.liveness_interval);
        if !self.flags.is_set(StatusBits::WIFI_CONNECTED) {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.is_connected() {
            return;
        }
        warn!("Session down, recreating");
        session.stop();
        thread::sleep(self.config.timing.session_recreate_delay);
        if let Err(e) = session.start() {
            warn!("{}", e);
        }
    }
}
