//! Network credential types.
//!
//! Platform-independent types for station-mode credentials that can be
//! tested on the host machine.
//!
//! # Example
//!
//! ```
//! use audio_link_esp32::config::{NetworkCredential, ConfigError};
//!
//! let cred = NetworkCredential::new("home", "secret123").unwrap();
//! assert!(!cred.is_open());
//!
//! let err = NetworkCredential::new("", "secret123").unwrap_err();
//! assert_eq!(err, ConfigError::SsidEmpty);
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Credentials for joining an access point in station mode.
///
/// The passphrase is wiped from memory when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkCredential {
    ssid: String,
    password: String,
}

impl NetworkCredential {
    /// Create a new credential.
    ///
    /// Returns an error if the SSID or passphrase violate the length bounds.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let cred = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        cred.validate()?;
        Ok(cred)
    }

    /// Create a credential for an open network (no passphrase).
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Validate the length bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_parts(&self.ssid, &self.password)
    }

    /// Network SSID.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Network passphrase (empty for open networks).
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Check if this is an open network (no passphrase).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// Never print the passphrase.
impl fmt::Debug for NetworkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredential")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .finish()
    }
}

/// Validate a raw SSID/passphrase pair without constructing a credential.
pub fn validate_parts(ssid: &str, password: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() {
        return Err(ConfigError::SsidEmpty);
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(ConfigError::SsidTooLong {
            len: ssid.len(),
            max: MAX_SSID_LEN,
        });
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ConfigError::PasswordTooLong {
            len: password.len(),
            max: MAX_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// Errors that can occur while validating credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Passphrase exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
