//! Audio capture and playback.
//!
//! [`AudioDriver`] is the hardware seam: it hands out playback (`Tx`) and
//! capture (`Rx`) channels and moves PCM through them. [`AudioService`]
//! owns a driver, opens channels lazily and exposes the operations the rest
//! of the firmware uses through [`AudioControl`].
//!
//! # Components
//!
//! - [`clips`] - notification chimes
//! - `i2s` - I2S driver (ESP32 only)

pub mod clips;

#[cfg(feature = "esp32")]
mod i2s;

#[cfg(feature = "esp32")]
pub use i2s::{I2sAudio, I2sPins};

use crate::config::AudioConfig;
use log::{error, info, warn};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Hardware audio driver.
pub trait AudioDriver: Send {
    /// Playback channel handle.
    type Tx: Send;
    /// Capture channel handle.
    type Rx: Send;

    fn init_playback(&mut self) -> Result<Self::Tx, AudioError>;
    fn init_record(&mut self) -> Result<Self::Rx, AudioError>;

    /// Write all of `pcm`, blocking until it is queued.
    fn play(&mut self, tx: &mut Self::Tx, pcm: &[u8]) -> Result<(), AudioError>;

    /// Fill `buf` or stop at `timeout`, returning the bytes captured.
    fn record(
        &mut self,
        rx: &mut Self::Rx,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, AudioError>;

    fn deinit_playback(&mut self, tx: Self::Tx);
    fn deinit_record(&mut self, rx: Self::Rx);
}

/// Audio operations used by the session, orchestrator and reset paths.
pub trait AudioControl: Send + Sync {
    /// Open the playback channel if it is not open yet.
    fn ensure_playback(&self) -> Result<(), AudioError>;

    /// Play a notification clip.
    fn play_clip(&self, id: u8) -> Result<(), AudioError>;

    /// Play raw PCM in the device format.
    fn play_pcm(&self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Capture `seconds` of audio.
    fn record(&self, seconds: u32) -> Result<Vec<u8>, AudioError>;
}

/// Audio errors.
#[derive(Debug)]
pub enum AudioError {
    /// No clip with this id.
    UnknownClip(u8),
    /// The capture buffer could not be allocated even at half size.
    OutOfMemory { requested: usize },
    /// Channel setup failed.
    Init(String),
    /// Driver read/write failed.
    Io(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for AudioError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownClip(id) => write!(f, "unknown clip id {}", id),
            Self::OutOfMemory { requested } => {
                write!(f, "failed to allocate {} byte capture buffer", requested)
            }
            Self::Init(msg) => write!(f, "audio init failed: {}", msg),
            Self::Io(msg) => write!(f, "audio I/O failed: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for AudioError {}

fn try_alloc(size: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).ok()?;
    buf.resize(size, 0);
    Some(buf)
}

/// Allocate `size` bytes with `alloc`; on failure retry once at half size.
pub fn alloc_degrading(
    size: usize,
    alloc: impl Fn(usize) -> Option<Vec<u8>>,
) -> Result<Vec<u8>, AudioError> {
    if let Some(buf) = alloc(size) {
        return Ok(buf);
    }
    let half = size / 2;
    warn!("Failed to allocate {} bytes, retrying with {}", size, half);
    match alloc(half) {
        Some(buf) if half > 0 => Ok(buf),
        _ => {
            error!("Failed to allocate capture buffer");
            Err(AudioError::OutOfMemory { requested: size })
        }
    }
}

struct Channels<D: AudioDriver> {
    driver: D,
    tx: Option<D::Tx>,
    rx: Option<D::Rx>,
}

/// Lazily initialised audio front end over an [`AudioDriver`].
pub struct AudioService<D: AudioDriver> {
    inner: Mutex<Channels<D>>,
    config: AudioConfig,
}

impl<D: AudioDriver> AudioService<D> {
    pub fn new(driver: D, config: AudioConfig) -> Self {
        Self {
            inner: Mutex::new(Channels {
                driver,
                tx: None,
                rx: None,
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channels<D>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Playback/capture format.
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Run a closure against the driver.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.lock().driver)
    }

    fn play_locked(channels: &mut Channels<D>, pcm: &[u8]) -> Result<(), AudioError> {
        let Channels { driver, tx, .. } = channels;
        if tx.is_none() {
            *tx = Some(driver.init_playback()?);
        }
        match tx.as_mut() {
            Some(tx) => driver.play(tx, pcm),
            None => Err(AudioError::Init("playback channel unavailable".into())),
        }
    }

    /// Close both channels.
    pub fn shutdown(&self) {
        let mut channels = self.lock();
        let Channels { driver, tx, rx } = &mut *channels;
        if let Some(tx) = tx.take() {
            driver.deinit_playback(tx);
        }
        if let Some(rx) = rx.take() {
            driver.deinit_record(rx);
        }
    }
}

impl<D: AudioDriver> AudioControl for AudioService<D> {
    fn ensure_playback(&self) -> Result<(), AudioError> {
        let mut channels = self.lock();
        let Channels { driver, tx, .. } = &mut *channels;
        if tx.is_none() {
            *tx = Some(driver.init_playback()?);
            info!("Playback channel ready");
        }
        Ok(())
    }

    fn play_clip(&self, id: u8) -> Result<(), AudioError> {
        let pcm = clips::render(id, &self.config).ok_or(AudioError::UnknownClip(id))?;
        info!("Playing clip {} ({} bytes)", id, pcm.len());
        Self::play_locked(&mut self.lock(), &pcm)
    }

    fn play_pcm(&self, pcm: &[u8]) -> Result<(), AudioError> {
        if pcm.is_empty() {
            return Ok(());
        }
        Self::play_locked(&mut self.lock(), pcm)
    }

    fn record(&self, seconds: u32) -> Result<Vec<u8>, AudioError> {
        let size = self.config.buffer_for(seconds);
        let mut buf = alloc_degrading(size, try_alloc)?;

        let mut channels = self.lock();
        let Channels { driver, rx, .. } = &mut *channels;
        if rx.is_none() {
            *rx = Some(driver.init_record()?);
        }
        let Some(rx) = rx.as_mut() else {
            return Err(AudioError::Init("capture channel unavailable".into()));
        };

        info!("Recording {} s into {} byte buffer", seconds, buf.len());
        let read = driver.record(rx, &mut buf, Duration::from_secs(u64::from(seconds)))?;
        buf.truncate(read);
        info!("Recorded {} bytes", read);
        Ok(buf)
    }
}
