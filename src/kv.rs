//! Namespaced key-value persistence.
//!
//! [`KvStore`] is the seam between the credential logic and the storage
//! medium. On the device it is backed by NVS (see `persistence`); on the
//! host by [`MemoryStore`](crate::persistence_host::MemoryStore) or
//! [`FileStore`](crate::persistence_host::FileStore).
//!
//! Writes are staged until [`commit`](KvStore::commit) is called.

use crate::config::ConfigError;
use std::fmt;
use std::io;

/// Namespaced string storage.
pub trait KvStore: Send {
    /// Read a string value. `Ok(None)` if the key is absent.
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    /// Stage a string value.
    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key succeeds.
    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError>;

    /// Make staged writes durable.
    fn commit(&mut self, namespace: &str) -> Result<(), StoreError>;
}

/// Errors reported by persistence backends and the credential store.
#[derive(Debug)]
pub enum StoreError {
    /// The value was rejected before anything was written.
    Invalid(ConfigError),
    /// A value read back after commit did not match what was written.
    VerifyFailed { key: String },
    /// Stored data could not be decoded.
    Corrupt(String),
    /// File-system failure (host backends).
    Io(io::Error),
    /// NVS failure (device backend).
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e)
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "invalid value: {}", e),
            Self::VerifyFailed { key } => write!(f, "read-back verification failed for '{}'", key),
            Self::Corrupt(msg) => write!(f, "stored data corrupted: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "NVS error: {:?}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
