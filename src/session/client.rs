//! Session lifecycle and command dispatch.
//!
//! [`SessionClient`] opens the transport and runs a worker thread that
//! handles transport events one at a time:
//!
//! - `Connected`: play the connected chime on the first connection since
//!   boot (or since the session has been down for `first_connect_rearm`),
//!   raise `SESSION_CONNECTED` and announce the device.
//! - `Disconnected`: raise `SESSION_DISCONNECTED` and arm the re-arm timer.
//! - text: decode and run the command, replying on the same channel.

use super::protocol::{InboundCommand, OutboundEvent};
use super::transport::{Connector, Transport, TransportEvent, TransportEventSink};
use super::SessionError;
use crate::audio::clips::CLIP_CONNECTED;
use crate::audio::AudioControl;
use crate::config::device::DEVICE_TYPE;
use crate::config::SessionConfig;
use crate::status::{StatusBits, StatusFlags};
use crate::system::{RestartReason, Restarter};
use crate::timer::OneShotTimer;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Worker stack; recordings and replies run on it.
const WORKER_STACK_SIZE: usize = 8192;

/// Session URL for a client: `<endpoint>/<client_id>`.
///
/// ```
/// use audio_link_esp32::session::session_url;
///
/// assert_eq!(session_url("ws://host:8080/ws/", "dev-1"), "ws://host:8080/ws/dev-1");
/// assert_eq!(session_url("ws://host:8080/ws", "dev-1"), "ws://host:8080/ws/dev-1");
/// ```
pub fn session_url(endpoint: &str, client_id: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), client_id)
}

struct Shared<T: Transport> {
    transport: Mutex<Option<T>>,
    flags: Arc<StatusFlags>,
    audio: Arc<dyn AudioControl>,
    restarter: Arc<dyn Restarter>,
    first_connection: Arc<AtomicBool>,
    rearm: OneShotTimer,
    config: SessionConfig,
}

impl<T: Transport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.transport.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, event: &OutboundEvent) {
        let text = event.to_json();
        let mut transport = self.lock();
        match transport.as_mut() {
            Some(t) if t.is_connected() => match t.send_text(&text) {
                Ok(()) => debug!("Sent {}", text),
                Err(e) => warn!("{}", e),
            },
            _ => warn!("Session not connected, dropping {}", text),
        }
    }

    fn on_connected(&self) {
        info!("Session connected");
        if self.first_connection.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.audio.play_clip(CLIP_CONNECTED) {
                warn!("Failed to play connected chime: {}", e);
            }
        }
        self.rearm.stop();
        self.flags.clear(StatusBits::SESSION_DISCONNECTED);
        self.flags.set(StatusBits::SESSION_CONNECTED);
        self.send(&OutboundEvent::DeviceConnected {
            client_id: self.config.client_id.clone(),
            device_type: DEVICE_TYPE.to_string(),
        });
    }

    fn on_disconnected(&self) {
        info!("Session disconnected");
        self.mark_down();
    }

    /// Flag the session as down and start the re-arm countdown.
    ///
    /// The countdown measures one continuous outage, so repeated disconnects
    /// while it runs leave the deadline alone.
    fn mark_down(&self) {
        self.flags.clear(StatusBits::SESSION_CONNECTED);
        self.flags.set(StatusBits::SESSION_DISCONNECTED);
        if !self.rearm.is_active() {
            self.rearm.start();
        }
    }

    fn on_text(&self, text: &str) {
        debug!("Received {}", text);
        match InboundCommand::parse(text) {
            Ok(cmd) => self.dispatch(cmd),
            Err(e) => warn!("{}", e),
        }
    }

    fn dispatch(&self, cmd: InboundCommand) {
        match cmd {
            InboundCommand::StartRecording { duration } => {
                info!("Recording for {} s", duration);
                self.send(&OutboundEvent::RecordingStarted { duration });
                match self.audio.record(duration) {
                    Ok(pcm) => {
                        self.send(&OutboundEvent::RecordComplete {
                            size: pcm.len(),
                            duration,
                        });
                        if let Err(e) = self.audio.play_pcm(&pcm) {
                            warn!("Failed to play back recording: {}", e);
                        }
                    }
                    Err(e) => error!("Recording failed: {}", e),
                }
            }
            InboundCommand::PlayPcm { id } => {
                let ok = match u8::try_from(id) {
                    Ok(clip) => match self.audio.play_clip(clip) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("{}", e);
                            false
                        }
                    },
                    Err(_) => {
                        warn!("Clip id {} out of range", id);
                        false
                    }
                };
                self.send(&OutboundEvent::play_result(id, ok));
            }
            InboundCommand::Restart => {
                info!("Restart requested by server");
                self.send(&OutboundEvent::restart_ack());
                thread::sleep(self.config.restart_grace);
                self.restarter.restart(RestartReason::RemoteRequest);
            }
            InboundCommand::Unknown(event) => info!("Ignoring unknown event '{}'", event),
        }
    }

    fn run(&self, events: Receiver<TransportEvent>) {
        for event in events {
            match event {
                TransportEvent::Connected => self.on_connected(),
                TransportEvent::Disconnected => self.on_disconnected(),
                TransportEvent::Text(text) => self.on_text(&text),
            }
        }
        debug!("Session worker exiting");
    }
}

/// Remote-control session client.
pub struct SessionClient<C: Connector> {
    connector: C,
    url: String,
    shared: Arc<Shared<C::Transport>>,
    events: Option<TransportEventSink>,
    worker: Option<JoinHandle<()>>,
}

impl<C: Connector> SessionClient<C>
where
    C::Transport: 'static,
{
    /// Create the client and its worker. Nothing connects until [`start`](Self::start).
    pub fn new(
        connector: C,
        config: SessionConfig,
        flags: Arc<StatusFlags>,
        audio: Arc<dyn AudioControl>,
        restarter: Arc<dyn Restarter>,
    ) -> Result<Self, SessionError> {
        let first_connection = Arc::new(AtomicBool::new(true));
        let rearm_flag = first_connection.clone();
        let rearm = OneShotTimer::new("ws-rearm", config.first_connect_rearm, move || {
            info!("Session down too long, next connect counts as first");
            rearm_flag.store(true, Ordering::SeqCst);
        })
        .map_err(SessionError::Spawn)?;

        let url = session_url(&config.endpoint, &config.client_id);
        let shared = Arc::new(Shared {
            transport: Mutex::new(None),
            flags,
            audio,
            restarter,
            first_connection,
            rearm,
            config,
        });

        let (tx, rx) = mpsc::channel();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("session".into())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker_shared.run(rx))
            .map_err(SessionError::Spawn)?;

        Ok(Self {
            connector,
            url,
            shared,
            events: Some(tx),
            worker: Some(worker),
        })
    }

    /// Full session URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the transport. A no-op while one is open.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let Some(events) = self.events.clone() else {
            return Err(SessionError::Connect("session is shut down".into()));
        };
        // Held across connect so an early Connected event waits for the
        // transport to be stored before replying on it.
        let mut transport = self.shared.lock();
        if transport.is_some() {
            return Ok(());
        }
        info!("Connecting to {}", self.url);
        *transport = Some(self.connector.connect(&self.url, &self.shared.config, events)?);
        Ok(())
    }

    /// Close the transport.
    ///
    /// A closed transport delivers no further events, so the session is
    /// marked down here.
    pub fn stop(&mut self) {
        let transport = self.shared.lock().take();
        if transport.is_some() {
            info!("Closing session");
            drop(transport);
            self.shared.mark_down();
        }
    }

    /// Check whether the transport reports an open socket.
    pub fn is_connected(&self) -> bool {
        self.shared
            .lock()
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    /// Check whether the next connection will play the connected chime.
    pub fn is_first_connection(&self) -> bool {
        self.shared.first_connection.load(Ordering::SeqCst)
    }
}

impl<C: Connector> Drop for SessionClient<C> {
    fn drop(&mut self) {
        drop(self.shared.lock().take());
        self.events = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::tests::{AudioCall, ScriptedAudio};
    use crate::system::RecordingRestarter;
    use std::time::{Duration, Instant};

    pub struct FakeTransport {
        sent: Arc<Mutex<Vec<String>>>,
        connected: Arc<AtomicBool>,
        sink: Arc<Mutex<Option<TransportEventSink>>>,
    }

    impl Transport for FakeTransport {
        fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    impl Drop for FakeTransport {
        fn drop(&mut self) {
            self.sink.lock().unwrap().take();
        }
    }

    /// Connector double. Tests drive the session through [`emit`](Self::emit).
    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub sink: Arc<Mutex<Option<TransportEventSink>>>,
        pub urls: Arc<Mutex<Vec<String>>>,
        pub sent: Arc<Mutex<Vec<String>>>,
        pub connected: Arc<AtomicBool>,
        pub fail: Arc<AtomicBool>,
    }

    impl FakeConnector {
        /// Deliver an event to the open transport's session.
        pub fn emit(&self, event: TransportEvent) {
            if let Some(sink) = self.sink.lock().unwrap().as_ref() {
                let _ = sink.send(event);
            }
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn connects(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        fn connect(
            &mut self,
            url: &str,
            _config: &SessionConfig,
            events: TransportEventSink,
        ) -> Result<FakeTransport, SessionError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SessionError::Connect("refused".into()));
            }
            self.urls.lock().unwrap().push(url.to_string());
            *self.sink.lock().unwrap() = Some(events);
            self.connected.store(true, Ordering::SeqCst);
            Ok(FakeTransport {
                sent: self.sent.clone(),
                connected: self.connected.clone(),
                sink: self.sink.clone(),
            })
        }
    }

    pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            endpoint: "ws://server/ws".into(),
            client_id: "dev-7".into(),
            first_connect_rearm: Duration::from_millis(60),
            restart_grace: Duration::from_millis(10),
            ..SessionConfig::default()
        }
    }

    struct Rig {
        client: SessionClient<FakeConnector>,
        connector: FakeConnector,
        flags: Arc<StatusFlags>,
        audio: Arc<ScriptedAudio>,
        restarter: Arc<RecordingRestarter>,
    }

    fn rig() -> Rig {
        let connector = FakeConnector::default();
        let flags = Arc::new(StatusFlags::new());
        let audio = Arc::new(ScriptedAudio::default());
        let restarter = Arc::new(RecordingRestarter::new());
        let mut client = SessionClient::new(
            connector.clone(),
            test_config(),
            flags.clone(),
            audio.clone(),
            restarter.clone(),
        )
        .unwrap();
        client.start().unwrap();
        Rig {
            client,
            connector,
            flags,
            audio,
            restarter,
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_url_join() {
        assert_eq!(session_url("ws://a/ws", "x"), "ws://a/ws/x");
        assert_eq!(session_url("ws://a/ws//", "x"), "ws://a/ws/x");
    }

    #[test]
    fn test_start_connects_once() {
        let mut rig = rig();
        rig.client.start().unwrap();
        assert_eq!(rig.connector.connects(), 1);
        assert_eq!(rig.connector.urls.lock().unwrap()[0], "ws://server/ws/dev-7");
    }

    #[test]
    fn test_connect_announces_device_and_chimes() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);

        assert!(wait_until(WAIT, || !rig.connector.sent().is_empty()));
        assert_eq!(
            rig.connector.sent()[0],
            r#"{"event":"device_connected","data":{"clientId":"dev-7","type":"esp32s3"}}"#
        );
        assert!(rig.flags.is_set(StatusBits::SESSION_CONNECTED));
        assert!(!rig.flags.is_set(StatusBits::SESSION_DISCONNECTED));
        assert_eq!(rig.audio.calls(), vec![AudioCall::Clip(CLIP_CONNECTED)]);
        assert!(!rig.client.is_first_connection());
    }

    #[test]
    fn test_quick_reconnect_is_silent() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        rig.connector.emit(TransportEvent::Disconnected);
        rig.connector.emit(TransportEvent::Connected);

        assert!(wait_until(WAIT, || rig.connector.sent().len() == 2));
        assert_eq!(rig.audio.calls(), vec![AudioCall::Clip(CLIP_CONNECTED)]);
        assert!(rig.flags.is_set(StatusBits::SESSION_CONNECTED));
    }

    #[test]
    fn test_long_outage_rearms_chime() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        rig.connector.emit(TransportEvent::Disconnected);

        assert!(wait_until(WAIT, || rig.flags.is_set(StatusBits::SESSION_DISCONNECTED)));
        assert!(wait_until(WAIT, || rig.client.is_first_connection()));

        rig.connector.emit(TransportEvent::Connected);
        assert!(wait_until(WAIT, || rig.audio.calls().len() == 2));
        assert_eq!(
            rig.audio.calls(),
            vec![AudioCall::Clip(CLIP_CONNECTED), AudioCall::Clip(CLIP_CONNECTED)]
        );
    }

    #[test]
    fn test_repeated_disconnects_keep_rearm_deadline() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        assert!(wait_until(WAIT, || !rig.connector.sent().is_empty()));

        // Failed reconnects keep reporting the outage well past the window.
        let outage = Instant::now();
        while outage.elapsed() < Duration::from_millis(300) {
            rig.connector.emit(TransportEvent::Disconnected);
            thread::sleep(Duration::from_millis(20));
        }
        // The last disconnect is only 20 ms old; the outage began long before.
        assert!(rig.client.is_first_connection());

        rig.connector.emit(TransportEvent::Connected);
        assert!(wait_until(WAIT, || rig.audio.calls().len() == 2));
        assert_eq!(
            rig.audio.calls(),
            vec![AudioCall::Clip(CLIP_CONNECTED), AudioCall::Clip(CLIP_CONNECTED)]
        );
    }

    #[test]
    fn test_stop_marks_session_down() {
        let mut rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        assert!(wait_until(WAIT, || rig.flags.is_set(StatusBits::SESSION_CONNECTED)));

        rig.client.stop();
        assert!(!rig.flags.is_set(StatusBits::SESSION_CONNECTED));
        assert!(rig.flags.is_set(StatusBits::SESSION_DISCONNECTED));
        assert!(wait_until(WAIT, || rig.client.is_first_connection()));
    }

    #[test]
    fn test_recording_round_trip() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        rig.connector.emit(TransportEvent::Text(
            r#"{"event":"start_recording","data":{"duration":3}}"#.into(),
        ));

        assert!(wait_until(WAIT, || rig.connector.sent().len() == 3));
        let sent = rig.connector.sent();
        assert_eq!(sent[1], r#"{"event":"recording_started","data":{"duration":3}}"#);
        assert_eq!(
            sent[2],
            r#"{"event":"record_complete","data":{"size":300,"duration":3}}"#
        );
        assert!(wait_until(WAIT, || rig
            .audio
            .calls()
            .contains(&AudioCall::Pcm(300))));
        assert!(rig.audio.calls().contains(&AudioCall::Record(3)));
    }

    #[test]
    fn test_failed_recording_sends_no_completion() {
        let connector = FakeConnector::default();
        let audio = Arc::new(ScriptedAudio {
            fail_record: true,
            ..ScriptedAudio::default()
        });
        let mut client = SessionClient::new(
            connector.clone(),
            test_config(),
            Arc::new(StatusFlags::new()),
            audio.clone(),
            Arc::new(RecordingRestarter::new()),
        )
        .unwrap();
        client.start().unwrap();

        connector.emit(TransportEvent::Connected);
        connector.emit(TransportEvent::Text(r#"{"event":"start_recording"}"#.into()));
        assert!(wait_until(WAIT, || audio.calls().contains(&AudioCall::Record(5))));
        thread::sleep(Duration::from_millis(30));

        let sent = connector.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("recording_started"));
    }

    #[test]
    fn test_play_pcm_reports_status() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"play_pcm","data":{"id":2}}"#.into()));
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"play_pcm","data":{"id":9}}"#.into()));
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"play_pcm","data":{"id":300}}"#.into()));

        assert!(wait_until(WAIT, || rig.connector.sent().len() == 4));
        let sent = rig.connector.sent();
        assert_eq!(sent[1], r#"{"event":"play_pcm_result","data":{"id":2,"status":"ok"}}"#);
        assert_eq!(sent[2], r#"{"event":"play_pcm_result","data":{"id":9,"status":"fail"}}"#);
        assert_eq!(
            sent[3],
            r#"{"event":"play_pcm_result","data":{"id":300,"status":"fail"}}"#
        );
    }

    #[test]
    fn test_restart_acks_then_restarts() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"restart"}"#.into()));

        assert_eq!(rig.restarter.wait(WAIT), Some(RestartReason::RemoteRequest));
        assert_eq!(
            rig.connector.sent()[1],
            r#"{"event":"restart_ack","data":{"status":"ok"}}"#
        );
    }

    #[test]
    fn test_garbage_and_unknown_are_ignored() {
        let rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        rig.connector.emit(TransportEvent::Text("{{{".into()));
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"sing"}"#.into()));
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"play_pcm"}"#.into()));

        assert!(wait_until(WAIT, || rig.connector.sent().len() == 2));
        assert_eq!(
            rig.connector.sent()[1],
            r#"{"event":"play_pcm_result","data":{"id":1,"status":"ok"}}"#
        );
    }

    #[test]
    fn test_replies_dropped_while_disconnected() {
        let rig = rig();
        rig.connector.connected.store(false, Ordering::SeqCst);
        rig.connector
            .emit(TransportEvent::Text(r#"{"event":"play_pcm","data":{"id":1}}"#.into()));
        assert!(wait_until(WAIT, || rig.audio.calls().len() == 1));
        thread::sleep(Duration::from_millis(20));
        assert!(rig.connector.sent().is_empty());
    }

    #[test]
    fn test_stop_and_restart_recreates_transport() {
        let mut rig = rig();
        rig.connector.emit(TransportEvent::Connected);
        assert!(wait_until(WAIT, || rig.client.is_connected()));

        rig.client.stop();
        assert!(!rig.client.is_connected());
        rig.client.start().unwrap();
        assert_eq!(rig.connector.connects(), 2);
    }

    #[test]
    fn test_connect_failure_is_reported() {
        let connector = FakeConnector::default();
        connector.fail.store(true, Ordering::SeqCst);
        let mut client = SessionClient::new(
            connector,
            test_config(),
            Arc::new(StatusFlags::new()),
            Arc::new(ScriptedAudio::default()),
            Arc::new(RecordingRestarter::new()),
        )
        .unwrap();
        assert!(matches!(client.start(), Err(SessionError::Connect(_))));
        assert!(!client.is_connected());
    }
}
