//! Device-wide connectivity signals.
//!
//! A single [`StatusFlags`] instance is created at boot and shared (via `Arc`)
//! with every subsystem that reports or observes connectivity. Bits are set
//! and cleared atomically; waiters block on a condition variable until any of
//! the requested bits is set or the timeout elapses.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use audio_link_esp32::status::{StatusBits, StatusFlags};
//!
//! let flags = StatusFlags::new();
//! flags.set(StatusBits::WIFI_CONNECTED);
//!
//! let hit = flags.wait_any(
//!     StatusBits::WIFI_CONNECTED | StatusBits::WIFI_FAIL,
//!     Duration::from_millis(10),
//! );
//! assert!(hit.contains(StatusBits::WIFI_CONNECTED));
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A set of status bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusBits(u32);

impl StatusBits {
    /// No bits set.
    pub const EMPTY: Self = Self(0);
    /// Station mode obtained an address.
    pub const WIFI_CONNECTED: Self = Self(1 << 0);
    /// Station mode gave up after exhausting its retries.
    pub const WIFI_FAIL: Self = Self(1 << 1);
    /// The provisioning portal persisted new credentials.
    pub const CONFIG_SAVED: Self = Self(1 << 2);
    /// A factory reset was requested.
    pub const FACTORY_RESET: Self = Self(1 << 3);
    /// The control-channel session is up.
    pub const SESSION_CONNECTED: Self = Self(1 << 4);
    /// The control-channel session dropped.
    pub const SESSION_DISCONNECTED: Self = Self(1 << 5);
    /// Every defined bit.
    pub const ALL: Self = Self(0x3F);

    /// Raw bit value.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check whether every bit in `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any bit in `other` is set in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Check whether no bits are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StatusBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for StatusBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(StatusBits, &str); 6] = [
            (StatusBits::WIFI_CONNECTED, "WIFI_CONNECTED"),
            (StatusBits::WIFI_FAIL, "WIFI_FAIL"),
            (StatusBits::CONFIG_SAVED, "CONFIG_SAVED"),
            (StatusBits::FACTORY_RESET, "FACTORY_RESET"),
            (StatusBits::SESSION_CONNECTED, "SESSION_CONNECTED"),
            (StatusBits::SESSION_DISCONNECTED, "SESSION_DISCONNECTED"),
        ];
        let mut set = f.debug_set();
        for (bit, name) in NAMES {
            if self.contains(bit) {
                set.entry(&format_args!("{}", name));
            }
        }
        set.finish()
    }
}

/// Shared, thread-safe set of status bits.
///
/// Reads are lock-free. Mutations update the atomic word and then notify
/// waiters under the internal mutex so a wakeup is never lost.
#[derive(Debug, Default)]
pub struct StatusFlags {
    bits: AtomicU32,
    lock: Mutex<()>,
    changed: Condvar,
}

impl StatusFlags {
    /// Create an empty flag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of all bits.
    pub fn get(&self) -> StatusBits {
        StatusBits(self.bits.load(Ordering::Acquire))
    }

    /// Check whether any bit in `mask` is currently set.
    pub fn is_set(&self, mask: StatusBits) -> bool {
        self.get().intersects(mask)
    }

    /// Set the bits in `mask` and wake all waiters.
    pub fn set(&self, mask: StatusBits) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.bits.fetch_or(mask.0, Ordering::AcqRel);
        self.changed.notify_all();
    }

    /// Clear the bits in `mask`.
    pub fn clear(&self, mask: StatusBits) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.bits.fetch_and(!mask.0, Ordering::AcqRel);
        self.changed.notify_all();
    }

    /// Atomically read and clear the bits in `mask`, returning those that were set.
    pub fn take(&self, mask: StatusBits) -> StatusBits {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.bits.fetch_and(!mask.0, Ordering::AcqRel);
        StatusBits(previous & mask.0)
    }

    /// Block until any bit in `mask` is set or `timeout` elapses.
    ///
    /// Returns the subset of `mask` that was set when the wait ended; an
    /// empty result means the wait timed out. Bits are left untouched.
    pub fn wait_any(&self, mask: StatusBits, timeout: Duration) -> StatusBits {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let hit = StatusBits(self.bits.load(Ordering::Acquire) & mask.0);
            if !hit.is_empty() {
                return hit;
            }
            let now = Instant::now();
            if now >= deadline {
                return StatusBits::EMPTY;
            }
            guard = match self.changed.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }
}
