//! One-shot software timers.
//!
//! Each [`OneShotTimer`] owns a small service thread that sleeps until the
//! armed deadline and then runs the callback. The callback runs on the timer
//! thread, so it must stay short; long work is handed to another thread.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use audio_link_esp32::timer::OneShotTimer;
//!
//! let fired = Arc::new(AtomicBool::new(false));
//! let flag = fired.clone();
//! let timer = OneShotTimer::new("example", Duration::from_millis(5), move || {
//!     flag.store(true, Ordering::SeqCst);
//! })
//! .unwrap();
//!
//! timer.start();
//! std::thread::sleep(Duration::from_millis(50));
//! assert!(fired.load(Ordering::SeqCst));
//! assert!(!timer.is_active());
//! ```

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Stack size for timer service threads.
const TIMER_STACK_SIZE: usize = 4096;

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A restartable one-shot timer.
pub struct OneShotTimer {
    name: String,
    period: Duration,
    shared: Arc<Shared>,
}

impl OneShotTimer {
    /// Create a timer that runs `callback` once `period` after each [`start`](Self::start).
    ///
    /// The timer is created idle.
    pub fn new<F>(name: &str, period: Duration, callback: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                deadline: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker = shared.clone();
        thread::Builder::new()
            .name(format!("tmr-{}", name))
            .stack_size(TIMER_STACK_SIZE)
            .spawn(move || Self::service(worker, callback))?;

        Ok(Self {
            name: name.to_string(),
            period,
            shared,
        })
    }

    fn service<F: Fn()>(shared: Arc<Shared>, callback: F) {
        let mut state = shared.lock();
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => {
                    state = shared.wake.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.deadline = None;
                        drop(state);
                        callback();
                        state = shared.lock();
                    } else {
                        state = match shared.wake.wait_timeout(state, deadline - now) {
                            Ok((s, _)) => s,
                            Err(e) => e.into_inner().0,
                        };
                    }
                }
            }
        }
    }

    /// Arm the timer. An already active timer is restarted from now.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        state.deadline = Some(Instant::now() + self.period);
        self.shared.wake.notify_all();
        log::debug!("Timer {} armed ({} ms)", self.name, self.period.as_millis());
    }

    /// Disarm the timer. Stopping an idle timer is a no-op.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if state.deadline.take().is_some() {
            log::debug!("Timer {} stopped", self.name);
        }
        self.shared.wake.notify_all();
    }

    /// Check whether the timer is armed and has not fired yet.
    pub fn is_active(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        state.deadline = None;
        self.shared.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer(period: Duration) -> (OneShotTimer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let timer = OneShotTimer::new("test", period, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (timer, count)
    }

    #[test]
    fn test_idle_timer_never_fires() {
        let (timer, count) = counting_timer(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.is_active());
    }

    #[test]
    fn test_fires_once_per_start() {
        let (timer, count) = counting_timer(Duration::from_millis(10));
        timer.start();
        assert!(timer.is_active());
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
    }

    #[test]
    fn test_stop_prevents_firing() {
        let (timer, count) = counting_timer(Duration::from_millis(50));
        timer.start();
        thread::sleep(Duration::from_millis(10));
        timer.stop();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_extends_deadline() {
        let (timer, count) = counting_timer(Duration::from_millis(60));
        timer.start();
        thread::sleep(Duration::from_millis(40));
        timer.start();
        thread::sleep(Duration::from_millis(40));
        // 80 ms after the first start, but only 40 ms after the restart.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_can_be_rearmed_after_firing() {
        let (timer, count) = counting_timer(Duration::from_millis(5));
        timer.start();
        thread::sleep(Duration::from_millis(40));
        timer.start();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
