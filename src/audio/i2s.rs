//! I2S audio driver.
//!
//! One bidirectional standard-mode I2S port shared by the DAC (playback)
//! and the microphone ADC (capture). The codecs are expected to be
//! configured for 16-bit Philips framing at the configured sample rate.

use super::{AudioDriver, AudioError};
use crate::config::AudioConfig;
use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::{AnyIOPin, Output, PinDriver};
use esp_idf_hal::i2s::config::{DataBitWidth, StdConfig};
use esp_idf_hal::i2s::{I2sBiDir, I2sDriver, I2S0};
use esp_idf_hal::peripheral::Peripheral;
use std::time::{Duration, Instant};

/// Bytes moved per driver read.
const READ_CHUNK: usize = 4096;

/// Per-write timeout.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pins used by the audio front end.
pub struct I2sPins {
    pub mclk: AnyIOPin,
    pub bclk: AnyIOPin,
    pub ws: AnyIOPin,
    pub dout: AnyIOPin,
    pub din: AnyIOPin,
    /// Power amplifier enable (active high).
    pub pa_enable: AnyIOPin,
}

/// I2S-backed [`AudioDriver`].
pub struct I2sAudio {
    i2s: I2sDriver<'static, I2sBiDir>,
    pa: PinDriver<'static, AnyIOPin, Output>,
}

impl I2sAudio {
    pub fn new(
        port: impl Peripheral<P = I2S0> + 'static,
        pins: I2sPins,
        config: &AudioConfig,
    ) -> Result<Self, AudioError> {
        let std_config = StdConfig::philips(config.sample_rate, DataBitWidth::Bits16);
        let i2s = I2sDriver::new_std_bidir(
            port,
            &std_config,
            pins.bclk,
            pins.din,
            pins.dout,
            Some(pins.mclk),
            pins.ws,
        )?;
        let mut pa = PinDriver::output(pins.pa_enable)?;
        pa.set_low()?;
        Ok(Self { i2s, pa })
    }
}

fn ticks(timeout: Duration) -> u32 {
    TickType::from(timeout).ticks()
}

impl AudioDriver for I2sAudio {
    type Tx = ();
    type Rx = ();

    fn init_playback(&mut self) -> Result<(), AudioError> {
        self.i2s.tx_enable()?;
        self.pa.set_high()?;
        log::info!("I2S playback enabled");
        Ok(())
    }

    fn init_record(&mut self) -> Result<(), AudioError> {
        self.i2s.rx_enable()?;
        log::info!("I2S capture enabled");
        Ok(())
    }

    fn play(&mut self, _tx: &mut (), pcm: &[u8]) -> Result<(), AudioError> {
        self.i2s
            .write_all(pcm, ticks(WRITE_TIMEOUT))
            .map_err(|e| AudioError::Io(format!("{:?}", e)))
    }

    fn record(
        &mut self,
        _rx: &mut (),
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, AudioError> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let end = (filled + READ_CHUNK).min(buf.len());
            let read = self
                .i2s
                .read(&mut buf[filled..end], ticks(deadline - now))
                .map_err(|e| AudioError::Io(format!("{:?}", e)))?;
            filled += read;
        }
        Ok(filled)
    }

    fn deinit_playback(&mut self, _tx: ()) {
        let _ = self.pa.set_low();
        if let Err(e) = self.i2s.tx_disable() {
            log::warn!("Failed to disable I2S playback: {:?}", e);
        }
    }

    fn deinit_record(&mut self, _rx: ()) {
        if let Err(e) = self.i2s.rx_disable() {
            log::warn!("Failed to disable I2S capture: {:?}", e);
        }
    }
}
