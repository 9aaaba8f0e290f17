//! Device lifecycle.
//!
//! [`Orchestrator`] walks the boot state machine:
//!
//! ```text
//! Init ─┬─ no credentials ─────────────► WifiConfig ─► restart
//!       └─ credentials ─► WifiConnecting ─┬─ fail ───┘
//!                                         └─ ok ─► WifiConnected ─► SessionActive
//! any unrecoverable error ─► Error ─► restart
//! ```
//!
//! Restarts are returned to the caller as a [`RestartReason`](crate::system::RestartReason).

mod orchestrator;

pub use orchestrator::{Orchestrator, PortalPorts};

use crate::portal::PortalError;
use crate::session::SessionError;
use crate::wifi::WifiError;
use std::fmt;
use std::io;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Init,
    WifiConfig,
    WifiConnecting,
    WifiConnected,
    SessionActive,
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::WifiConfig => "wifi-config",
            Self::WifiConnecting => "wifi-connecting",
            Self::WifiConnected => "wifi-connected",
            Self::SessionActive => "session-active",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Unrecoverable orchestration errors.
#[derive(Debug)]
pub enum DeviceError {
    Wifi(WifiError),
    Portal(PortalError),
    Session(SessionError),
    /// A background thread could not be started.
    Spawn(io::Error),
}

impl From<WifiError> for DeviceError {
    fn from(e: WifiError) -> Self {
        Self::Wifi(e)
    }
}

impl From<PortalError> for DeviceError {
    fn from(e: PortalError) -> Self {
        Self::Portal(e)
    }
}

impl From<SessionError> for DeviceError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl From<io::Error> for DeviceError {
    fn from(e: io::Error) -> Self {
        Self::Spawn(e)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi(e) => write!(f, "Wi-Fi: {}", e),
            Self::Portal(e) => write!(f, "portal: {}", e),
            Self::Session(e) => write!(f, "session: {}", e),
            Self::Spawn(e) => write!(f, "thread spawn failed: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wifi(e) => Some(e),
            Self::Portal(e) => Some(e),
            Self::Session(e) => Some(e),
            Self::Spawn(e) => Some(e),
        }
    }
}
