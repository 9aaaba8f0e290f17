//! `application/x-www-form-urlencoded` decoding for the credential form.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Decode `+` as space and `%XX` escapes. Malformed escapes are kept
/// literally; invalid UTF-8 is replaced.
///
/// # Example
///
/// ```
/// use audio_link_esp32::portal::url_decode;
///
/// assert_eq!(url_decode("My+Home%21"), "My Home!");
/// assert_eq!(url_decode("100%"), "100%");
/// ```
pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                    out.push((hex_value(hi) << 4) | hex_value(lo));
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    let decoded = String::from_utf8_lossy(&out).into_owned();
    out.zeroize();
    decoded
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Credentials submitted through the portal.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WifiForm {
    pub ssid: String,
    pub password: String,
}

impl WifiForm {
    /// Parse `ssid=..&password=..`. A missing password means an open network.
    pub fn parse(body: &str) -> Result<Self, FormError> {
        let mut ssid = None;
        let mut password = None;

        for pair in body.trim().split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "ssid" => ssid = Some(url_decode(value)),
                "password" => password = Some(url_decode(value)),
                _ => {}
            }
        }

        let ssid = ssid.ok_or(FormError::MissingSsid)?;
        Ok(Self {
            ssid,
            password: password.unwrap_or_default(),
        })
    }
}

impl fmt::Debug for WifiForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiForm")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .finish()
    }
}

/// Form decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// The body carries no `ssid` field.
    MissingSsid,
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSsid => write!(f, "missing ssid field"),
        }
    }
}

impl std::error::Error for FormError {}
