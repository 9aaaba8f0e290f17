//! ESP32-S3 audio appliance firmware.

#[cfg(feature = "esp32")]
fn main() {
    use audio_link_esp32::system::{EspRestarter, RestartReason, Restarter};

    // Link ESP-IDF patches before anything else runs.
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== Audio link starting ===");

    let reason = match firmware::run() {
        Ok(reason) => reason,
        Err(e) => {
            log::error!("Bring-up failed: {}", e);
            std::thread::sleep(
                audio_link_esp32::DeviceConfig::default()
                    .timing
                    .error_restart_delay,
            );
            RestartReason::InitFailure
        }
    };
    EspRestarter.restart(reason);
}

#[cfg(feature = "esp32")]
mod firmware {
    use audio_link_esp32::audio::{AudioControl, AudioService, I2sAudio, I2sPins};
    use audio_link_esp32::config::device::BUTTON_QUEUE_CAPACITY;
    use audio_link_esp32::persistence::NvsStore;
    use audio_link_esp32::reset::GpioButton;
    use audio_link_esp32::session::EspConnector;
    use audio_link_esp32::system::{EspRestarter, RestartReason};
    use audio_link_esp32::wifi::{
        subscribe_station_events, CredentialStore, EspWifiDriver, NetworkModeManager,
    };
    use audio_link_esp32::{DeviceConfig, Orchestrator, StatusFlags};
    use esp_idf_hal::gpio::IOPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use std::error::Error;
    use std::sync::Arc;

    pub fn run() -> Result<RestartReason, Box<dyn Error>> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;
        let config = DeviceConfig::default();
        let flags = Arc::new(StatusFlags::new());

        let credentials = Arc::new(CredentialStore::new(NvsStore::new(nvs.clone())));
        let driver = EspWifiDriver::new(peripherals.modem, sysloop.clone(), nvs)?;
        let wifi = Arc::new(NetworkModeManager::new(driver, flags.clone(), config.retry)?);
        let _events = subscribe_station_events(&sysloop, wifi.event_sink())?;

        let pins = peripherals.pins;
        let i2s = I2sAudio::new(
            peripherals.i2s0,
            I2sPins {
                mclk: pins.gpio38.downgrade(),
                bclk: pins.gpio14.downgrade(),
                ws: pins.gpio13.downgrade(),
                dout: pins.gpio45.downgrade(),
                din: pins.gpio12.downgrade(),
                pa_enable: pins.gpio3.downgrade(),
            },
            &config.audio,
        )?;
        let audio: Arc<dyn AudioControl> = Arc::new(AudioService::new(i2s, config.audio));
        // BOOT button.
        let button = GpioButton::new(pins.gpio0.downgrade(), BUTTON_QUEUE_CAPACITY)?;

        let mut device = Orchestrator::new(
            config,
            flags,
            credentials,
            wifi,
            EspConnector,
            audio,
            Arc::new(EspRestarter),
        )
        .with_reset_button(button);

        Ok(device.run())
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Run 'cargo run --bin portal-host' to try the provisioning portal on the host.");
}
