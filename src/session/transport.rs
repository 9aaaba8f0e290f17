//! WebSocket transport seam.
//!
//! A [`Connector`] opens a [`Transport`] and wires its lifecycle and
//! incoming text frames into a channel of [`TransportEvent`]s. The session
//! client consumes that channel on its own thread, so events are handled
//! strictly in arrival order.

use super::SessionError;
use crate::config::SessionConfig;
use std::sync::mpsc::Sender;

/// Something the transport reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Text(String),
}

/// Where transports deliver their events.
pub type TransportEventSink = Sender<TransportEvent>;

/// An open control channel.
///
/// Dropping the transport closes it and stops event delivery.
pub trait Transport: Send {
    /// Send one text frame.
    fn send_text(&mut self, text: &str) -> Result<(), SessionError>;

    /// Check whether the underlying socket is up.
    fn is_connected(&self) -> bool;
}

/// Opens transports.
pub trait Connector: Send {
    type Transport: Transport;

    /// Start connecting to `url`. The connection completes asynchronously
    /// and is announced with [`TransportEvent::Connected`].
    fn connect(
        &mut self,
        url: &str,
        config: &SessionConfig,
        events: TransportEventSink,
    ) -> Result<Self::Transport, SessionError>;
}

#[cfg(feature = "esp32")]
pub use esp::{EspConnector, EspTransport};

#[cfg(feature = "esp32")]
mod esp {
    use super::*;
    use esp_idf_svc::io::EspIOError;
    use esp_idf_svc::ws::client::{
        EspWebSocketClient, EspWebSocketClientConfig, WebSocketEvent, WebSocketEventType,
    };
    use esp_idf_svc::ws::FrameType;
    use log::{debug, warn};

    /// Transport backed by the ESP-IDF WebSocket client.
    ///
    /// The client reconnects on its own; `reconnect_interval` from
    /// [`SessionConfig`] sets its back-off.
    pub struct EspTransport {
        client: EspWebSocketClient<'static>,
    }

    impl Transport for EspTransport {
        fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
            self.client
                .send(FrameType::Text(false), text.as_bytes())
                .map_err(|e| SessionError::Send(e.to_string()))
        }

        fn is_connected(&self) -> bool {
            self.client.is_connected()
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct EspConnector;

    fn forward(events: &TransportEventSink, event: &Result<WebSocketEvent<'_>, EspIOError>) {
        let mapped = match event {
            Ok(event) => match &event.event_type {
                WebSocketEventType::Connected => Some(TransportEvent::Connected),
                WebSocketEventType::Disconnected | WebSocketEventType::Closed => {
                    Some(TransportEvent::Disconnected)
                }
                WebSocketEventType::Text(text) => Some(TransportEvent::Text(text.to_string())),
                other => {
                    debug!("Ignoring WebSocket event {:?}", other);
                    None
                }
            },
            Err(e) => {
                warn!("WebSocket error: {}", e);
                None
            }
        };
        if let Some(event) = mapped {
            // The receiver is gone once the session is being torn down.
            let _ = events.send(event);
        }
    }

    impl Connector for EspConnector {
        type Transport = EspTransport;

        fn connect(
            &mut self,
            url: &str,
            config: &SessionConfig,
            events: TransportEventSink,
        ) -> Result<EspTransport, SessionError> {
            let ws_config = EspWebSocketClientConfig {
                reconnect_timeout_ms: config.reconnect_interval,
                network_timeout_ms: config.network_timeout,
                ping_interval_sec: config.ping_interval,
                ..Default::default()
            };
            let client = EspWebSocketClient::new(
                url,
                &ws_config,
                config.network_timeout,
                move |event| forward(&events, event),
            )
            .map_err(|e| SessionError::Connect(e.to_string()))?;
            Ok(EspTransport { client })
        }
    }
}
