//! Remote-control session.
//!
//! The device keeps one WebSocket open to the control server and reacts to
//! JSON commands on it.
//!
//! # Components
//!
//! - [`protocol`] - frame encoding and command parsing
//! - [`transport`] - WebSocket seam and the ESP-IDF binding
//! - [`client`] - connection lifecycle and command dispatch

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{session_url, SessionClient};
pub use protocol::{InboundCommand, OutboundEvent};
pub use transport::{Connector, Transport, TransportEvent, TransportEventSink};

#[cfg(feature = "esp32")]
pub use transport::{EspConnector, EspTransport};

use std::fmt;
use std::io;

/// Session errors.
#[derive(Debug)]
pub enum SessionError {
    /// The transport could not be created.
    Connect(String),
    /// A frame could not be sent.
    Send(String),
    /// An incoming frame was not valid JSON or lacked `event`.
    Malformed(String),
    /// Worker or timer thread could not be started.
    Spawn(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "failed to create session: {}", msg),
            Self::Send(msg) => write!(f, "failed to send frame: {}", msg),
            Self::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            Self::Spawn(e) => write!(f, "failed to start session thread: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}
