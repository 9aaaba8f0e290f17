//! Process-level control.
//!
//! Restarts are requested through [`Restarter`]. On the device the request
//! never returns; host implementations record or log it.

use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Why the device is restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// New credentials were provisioned.
    ConfigSaved,
    /// Credentials were wiped.
    FactoryReset,
    /// The control server asked for it.
    RemoteRequest,
    /// Bring-up failed.
    InitFailure,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigSaved => write!(f, "configuration saved"),
            Self::FactoryReset => write!(f, "factory reset"),
            Self::RemoteRequest => write!(f, "remote request"),
            Self::InitFailure => write!(f, "initialisation failure"),
        }
    }
}

/// Restarts the system.
pub trait Restarter: Send + Sync {
    fn restart(&self, reason: RestartReason);
}

impl<F: Fn(RestartReason) + Send + Sync> Restarter for F {
    fn restart(&self, reason: RestartReason) {
        self(reason)
    }
}

/// Restarter that only records requests.
#[derive(Debug, Default)]
pub struct RecordingRestarter {
    requests: Mutex<Vec<RestartReason>>,
    requested: Condvar,
}

impl RecordingRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request so far.
    pub fn requests(&self) -> Vec<RestartReason> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Block until at least one request arrived or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<RestartReason> {
        let guard = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .requested
            .wait_timeout_while(guard, timeout, |r| r.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        guard.first().copied()
    }
}

impl Restarter for RecordingRestarter {
    fn restart(&self, reason: RestartReason) {
        log::warn!("Restart requested: {}", reason);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reason);
        self.requested.notify_all();
    }
}

/// Restarts the chip.
#[cfg(feature = "esp32")]
#[derive(Debug, Default, Clone, Copy)]
pub struct EspRestarter;

#[cfg(feature = "esp32")]
impl Restarter for EspRestarter {
    fn restart(&self, reason: RestartReason) {
        log::warn!("Restarting: {}", reason);
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_recording_restarter_wakes_waiter() {
        let restarter = Arc::new(RecordingRestarter::new());
        let other = restarter.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.restart(RestartReason::RemoteRequest);
        });
        assert_eq!(
            restarter.wait(Duration::from_secs(5)),
            Some(RestartReason::RemoteRequest)
        );
    }

    #[test]
    fn test_wait_times_out() {
        let restarter = RecordingRestarter::new();
        assert_eq!(restarter.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_closure_restarter() {
        let seen = Mutex::new(None);
        let restarter = |reason: RestartReason| *seen.lock().unwrap() = Some(reason);
        restarter.restart(RestartReason::FactoryReset);
        assert_eq!(*seen.lock().unwrap(), Some(RestartReason::FactoryReset));
    }
}
