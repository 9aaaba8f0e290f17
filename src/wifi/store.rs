//! Persistent station credentials.
//!
//! Credentials live in the `wifi_config` namespace under two string keys,
//! `ssid` and `password`. A credential is only reported when both keys are
//! present and within bounds.

use crate::config::{validate_parts, NetworkCredential};
use crate::kv::{KvStore, StoreError};
use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard};
use zeroize::Zeroize;

/// Namespace holding the station credentials.
pub const NAMESPACE: &str = "wifi_config";

/// Key for the SSID.
pub const KEY_SSID: &str = "ssid";

/// Key for the passphrase.
pub const KEY_PASSWORD: &str = "password";

/// Credential store over any [`KvStore`].
///
/// Share it between threads with `Arc<CredentialStore<S>>`.
pub struct CredentialStore<S: KvStore> {
    backend: Mutex<S>,
}

impl<S: KvStore> CredentialStore<S> {
    /// Wrap a backend.
    pub fn new(backend: S) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    fn backend(&self) -> MutexGuard<'_, S> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a closure against the backend (tests and diagnostics).
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.backend())
    }

    /// Load the stored credential if both keys exist and are within bounds.
    pub fn has_valid(&self) -> Option<NetworkCredential> {
        let backend = self.backend();

        let ssid = match backend.get_str(NAMESPACE, KEY_SSID) {
            Ok(Some(s)) => s,
            Ok(None) => {
                debug!("No stored SSID");
                return None;
            }
            Err(e) => {
                warn!("Failed to read stored SSID: {}", e);
                return None;
            }
        };
        let mut password = match backend.get_str(NAMESPACE, KEY_PASSWORD) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("No stored password");
                return None;
            }
            Err(e) => {
                warn!("Failed to read stored password: {}", e);
                return None;
            }
        };

        let cred = NetworkCredential::new(ssid, password.as_str());
        password.zeroize();
        match cred {
            Ok(cred) => Some(cred),
            Err(e) => {
                warn!("Stored credential rejected: {}", e);
                None
            }
        }
    }

    /// Persist a credential.
    ///
    /// Bounds are checked before anything is written. Both keys are written,
    /// committed and read back.
    pub fn save(&self, ssid: &str, password: &str) -> Result<(), StoreError> {
        validate_parts(ssid, password)?;

        let mut backend = self.backend();
        backend.set_str(NAMESPACE, KEY_SSID, ssid)?;
        backend.set_str(NAMESPACE, KEY_PASSWORD, password)?;
        backend.commit(NAMESPACE)?;

        // Read back to catch silent write failures
        for (key, expected) in [(KEY_SSID, ssid), (KEY_PASSWORD, password)] {
            let mut stored = backend.get_str(NAMESPACE, key)?;
            let matches = stored.as_deref() == Some(expected);
            stored.zeroize();
            if !matches {
                log::error!("Credential verification failed for key {}", key);
                return Err(StoreError::VerifyFailed {
                    key: key.to_string(),
                });
            }
        }

        info!("Credentials saved for SSID {}", ssid);
        Ok(())
    }

    /// Persist an already validated credential.
    pub fn save_credential(&self, cred: &NetworkCredential) -> Result<(), StoreError> {
        self.save(cred.ssid(), cred.password())
    }

    /// Remove both keys. Succeeds when nothing is stored.
    pub fn erase(&self) -> Result<(), StoreError> {
        let mut backend = self.backend();
        backend.remove(NAMESPACE, KEY_SSID)?;
        backend.remove(NAMESPACE, KEY_PASSWORD)?;
        backend.commit(NAMESPACE)?;
        warn!("Stored credentials erased");
        Ok(())
    }
}
