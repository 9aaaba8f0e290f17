//! Factory reset.
//!
//! The reset button is active low. Every edge is turned into a
//! [`ButtonEvent`] and queued without blocking; a consumer thread arms a
//! one-shot timer on press and disarms it on release. If the timer fires the
//! button was held for the full hold time, and the reset worker wipes the
//! stored credentials and restarts.
//!
//! Setting [`StatusBits::FACTORY_RESET`] requests the same reset from
//! software.
//!
//! ```text
//! edge ─► queue ─► consumer ─► hold timer ─► reset worker ─► restart
//!                                   FACTORY_RESET bit ─┘
//! ```

use crate::audio::clips::CLIP_DEFAULT;
use crate::audio::AudioControl;
use crate::config::TimingConfig;
use crate::kv::{KvStore, StoreError};
use crate::status::{StatusBits, StatusFlags};
use crate::system::{RestartReason, Restarter};
use crate::timer::OneShotTimer;
use crate::wifi::{CredentialStore, NetworkModeManager, WifiDriver, WifiError};
use log::{debug, error, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const THREAD_STACK_SIZE: usize = 4096;

/// How often the software-reset watcher rechecks its shutdown flag.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// A reset button edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Press,
    Release,
}

impl ButtonEvent {
    /// Map a pin level to an event. The button pulls the pin low.
    pub fn from_level(high: bool) -> Self {
        if high {
            Self::Release
        } else {
            Self::Press
        }
    }
}

/// Blocking source of button events.
pub trait ButtonSource: Send + 'static {
    /// Next event, or `None` once the source is closed.
    fn next_event(&mut self) -> Option<ButtonEvent>;
}

impl ButtonSource for Box<dyn ButtonSource> {
    fn next_event(&mut self) -> Option<ButtonEvent> {
        (**self).next_event()
    }
}

impl ButtonSource for Receiver<ButtonEvent> {
    fn next_event(&mut self) -> Option<ButtonEvent> {
        self.recv().ok()
    }
}

/// Bounded button queue for host use.
pub fn button_channel(capacity: usize) -> (SyncSender<ButtonEvent>, Receiver<ButtonEvent>) {
    mpsc::sync_channel(capacity)
}

/// Queue an event without blocking. Returns `false` if the queue was full.
pub fn enqueue(queue: &SyncSender<ButtonEvent>, event: ButtonEvent) -> bool {
    queue.try_send(event).is_ok()
}

/// What started a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTrigger {
    /// The button was held for the full hold time.
    LongPress,
    /// `FACTORY_RESET` was raised.
    Software,
}

/// Networking that a reset shuts down.
pub trait NetworkControl: Send + Sync {
    fn stop_network(&self) -> Result<(), WifiError>;
}

impl<D: WifiDriver + 'static> NetworkControl for NetworkModeManager<D> {
    fn stop_network(&self) -> Result<(), WifiError> {
        self.stop()
    }
}

/// Credentials that a reset erases.
pub trait CredentialEraser: Send + Sync {
    fn erase_credentials(&self) -> Result<(), StoreError>;
}

impl<S: KvStore> CredentialEraser for CredentialStore<S> {
    fn erase_credentials(&self) -> Result<(), StoreError> {
        self.erase()
    }
}

/// The reset itself.
pub struct ResetAction {
    pub network: Arc<dyn NetworkControl>,
    pub credentials: Arc<dyn CredentialEraser>,
    pub flags: Arc<StatusFlags>,
    pub audio: Arc<dyn AudioControl>,
    pub restarter: Arc<dyn Restarter>,
    pub settle_delay: Duration,
}

impl ResetAction {
    /// Stop networking, erase credentials, clear all status bits, wait and restart.
    pub fn execute(&self, trigger: ResetTrigger) {
        warn!("Factory reset requested ({:?})", trigger);
        if trigger == ResetTrigger::Software {
            if let Err(e) = self.audio.play_clip(CLIP_DEFAULT) {
                warn!("Failed to play reset chime: {}", e);
            }
        }
        if let Err(e) = self.network.stop_network() {
            warn!("Failed to stop Wi-Fi: {}", e);
        }
        match self.credentials.erase_credentials() {
            Ok(()) => info!("Stored Wi-Fi credentials erased"),
            Err(e) => error!("Failed to erase credentials: {}", e),
        }
        self.flags.clear(StatusBits::ALL);
        thread::sleep(self.settle_delay);
        self.restarter.restart(RestartReason::FactoryReset);
    }
}

/// Running reset monitor.
///
/// Dropping it stops the software-reset watcher. The button consumer runs
/// until its source closes.
pub struct ResetMonitor {
    shutdown: Arc<AtomicBool>,
}

impl ResetMonitor {
    /// Start the button consumer, the reset worker and the software-reset
    /// watcher.
    pub fn start<B: ButtonSource>(
        source: B,
        timing: &TimingConfig,
        action: ResetAction,
    ) -> io::Result<Self> {
        let flags = action.flags.clone();
        let (triggers, pending) = mpsc::sync_channel::<ResetTrigger>(1);

        thread::Builder::new()
            .name("reset-worker".into())
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || {
                for trigger in pending {
                    action.execute(trigger);
                }
            })?;

        let timer_triggers = triggers.clone();
        let hold = OneShotTimer::new("reset-hold", timing.reset_hold, move || {
            // Runs on the timer thread; the reset itself happens on the worker.
            let _ = timer_triggers.try_send(ResetTrigger::LongPress);
        })?;

        thread::Builder::new()
            .name("reset-button".into())
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || consume(source, hold))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let watch_shutdown = shutdown.clone();
        thread::Builder::new()
            .name("reset-watch".into())
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || watch(flags, triggers, watch_shutdown))?;

        info!(
            "Reset monitor started (hold {} ms)",
            timing.reset_hold.as_millis()
        );
        Ok(Self { shutdown })
    }
}

impl Drop for ResetMonitor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn consume<B: ButtonSource>(mut source: B, hold: OneShotTimer) {
    while let Some(event) = source.next_event() {
        match event {
            ButtonEvent::Press => {
                if !hold.is_active() {
                    debug!("Reset button pressed");
                    hold.start();
                }
            }
            ButtonEvent::Release => {
                if hold.is_active() {
                    debug!("Reset button released early");
                    hold.stop();
                }
            }
        }
    }
    debug!("Button source closed");
}

fn watch(flags: Arc<StatusFlags>, triggers: SyncSender<ResetTrigger>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        let hit = flags.wait_any(StatusBits::FACTORY_RESET, WATCH_INTERVAL);
        if hit.is_empty() || shutdown.load(Ordering::SeqCst) {
            continue;
        }
        flags.take(StatusBits::FACTORY_RESET);
        if triggers.try_send(ResetTrigger::Software).is_err() {
            debug!("Reset already pending");
        }
    }
}

#[cfg(feature = "esp32")]
pub use gpio::GpioButton;

#[cfg(feature = "esp32")]
mod gpio {
    use super::{ButtonEvent, ButtonSource};
    use esp_idf_hal::delay::BLOCK;
    use esp_idf_hal::gpio::{AnyIOPin, Input, InterruptType, PinDriver, Pull};
    use esp_idf_hal::task::queue::Queue;
    use esp_idf_sys::EspError;
    use std::sync::Arc;

    /// Reset button on a GPIO with an any-edge interrupt.
    pub struct GpioButton {
        pin: PinDriver<'static, AnyIOPin, Input>,
        queue: Arc<Queue<ButtonEvent>>,
    }

    impl GpioButton {
        pub fn new(pin: AnyIOPin, capacity: usize) -> Result<Self, EspError> {
            let mut pin = PinDriver::input(pin)?;
            pin.set_pull(Pull::Up)?;
            pin.set_interrupt_type(InterruptType::AnyEdge)?;

            let queue = Arc::new(Queue::new(capacity));
            let isr_queue = queue.clone();
            let gpio = pin.pin();
            // Interrupt context: read the level and enqueue, nothing else.
            unsafe {
                pin.subscribe(move || {
                    let high = esp_idf_sys::gpio_get_level(gpio) != 0;
                    let _ = isr_queue.send_back(ButtonEvent::from_level(high), 0);
                })?;
            }
            pin.enable_interrupt()?;
            Ok(Self { pin, queue })
        }
    }

    impl ButtonSource for GpioButton {
        fn next_event(&mut self) -> Option<ButtonEvent> {
            loop {
                if let Some((event, _)) = self.queue.recv_front(BLOCK) {
                    // The driver disarms the interrupt after every edge.
                    if let Err(e) = self.pin.enable_interrupt() {
                        log::error!("Failed to re-arm reset button interrupt: {:?}", e);
                        return None;
                    }
                    return Some(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::{AudioCall, ScriptedAudio};
    use crate::config::RetryConfig;
    use crate::persistence_host::MemoryStore;
    use crate::system::RecordingRestarter;
    use crate::wifi::manager::tests::{DriverCall, FakeDriver};

    struct Rig {
        queue: SyncSender<ButtonEvent>,
        flags: Arc<StatusFlags>,
        store: Arc<CredentialStore<MemoryStore>>,
        wifi: Arc<NetworkModeManager<FakeDriver>>,
        audio: Arc<ScriptedAudio>,
        restarter: Arc<RecordingRestarter>,
        _monitor: ResetMonitor,
    }

    fn rig(hold_ms: u64) -> Rig {
        let flags = Arc::new(StatusFlags::new());
        let store = Arc::new(CredentialStore::new(MemoryStore::new()));
        store.save("home", "secret123").unwrap();
        let wifi = Arc::new(
            NetworkModeManager::new(FakeDriver::default(), flags.clone(), RetryConfig::default())
                .unwrap(),
        );
        let audio = Arc::new(ScriptedAudio::default());
        let restarter = Arc::new(RecordingRestarter::new());

        let timing = TimingConfig {
            reset_hold: Duration::from_millis(hold_ms),
            reset_settle_delay: Duration::from_millis(1),
            ..TimingConfig::default()
        };
        let action = ResetAction {
            network: wifi.clone(),
            credentials: store.clone(),
            flags: flags.clone(),
            audio: audio.clone(),
            restarter: restarter.clone(),
            settle_delay: timing.reset_settle_delay,
        };
        let (queue, events) = button_channel(10);
        let monitor = ResetMonitor::start(events, &timing, action).unwrap();
        Rig {
            queue,
            flags,
            store,
            wifi,
            audio,
            restarter,
            _monitor: monitor,
        }
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(ButtonEvent::from_level(false), ButtonEvent::Press);
        assert_eq!(ButtonEvent::from_level(true), ButtonEvent::Release);
    }

    #[test]
    fn test_enqueue_drops_on_overflow() {
        let (queue, _events) = button_channel(2);
        assert!(enqueue(&queue, ButtonEvent::Press));
        assert!(enqueue(&queue, ButtonEvent::Release));
        assert!(!enqueue(&queue, ButtonEvent::Press));
    }

    #[test]
    fn test_long_press_resets_once() {
        let rig = rig(50);
        rig.flags
            .set(StatusBits::WIFI_CONNECTED | StatusBits::SESSION_CONNECTED);
        enqueue(&rig.queue, ButtonEvent::Press);

        assert_eq!(
            rig.restarter.wait(Duration::from_secs(2)),
            Some(RestartReason::FactoryReset)
        );
        thread::sleep(Duration::from_millis(150));

        assert_eq!(rig.restarter.requests().len(), 1);
        assert!(rig.store.has_valid().is_none());
        assert!(rig.flags.get().is_empty());
        rig.wifi
            .with_driver(|d| assert_eq!(d.count(&DriverCall::Stop), 1));
        // Button resets stay silent.
        assert!(rig.audio.calls().is_empty());
    }

    #[test]
    fn test_short_press_does_nothing() {
        let rig = rig(80);
        enqueue(&rig.queue, ButtonEvent::Press);
        thread::sleep(Duration::from_millis(10));
        enqueue(&rig.queue, ButtonEvent::Release);

        assert_eq!(rig.restarter.wait(Duration::from_millis(250)), None);
        assert!(rig.store.has_valid().is_some());
    }

    #[test]
    fn test_bouncing_then_hold_resets_once() {
        let rig = rig(80);
        for _ in 0..4 {
            enqueue(&rig.queue, ButtonEvent::Press);
            enqueue(&rig.queue, ButtonEvent::Release);
        }
        enqueue(&rig.queue, ButtonEvent::Press);
        enqueue(&rig.queue, ButtonEvent::Press);

        assert!(rig.restarter.wait(Duration::from_secs(2)).is_some());
        thread::sleep(Duration::from_millis(250));
        assert_eq!(rig.restarter.requests().len(), 1);
    }

    #[test]
    fn test_software_reset_plays_chime() {
        let rig = rig(5000);
        rig.flags.set(StatusBits::FACTORY_RESET);

        assert_eq!(
            rig.restarter.wait(Duration::from_secs(2)),
            Some(RestartReason::FactoryReset)
        );
        assert_eq!(rig.audio.calls(), vec![AudioCall::Clip(CLIP_DEFAULT)]);
        assert!(rig.store.has_valid().is_none());
        assert!(!rig.flags.is_set(StatusBits::FACTORY_RESET));
    }
}
