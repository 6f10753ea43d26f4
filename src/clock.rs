//! Time sources driving timeline playback.
//!
//! `VirtualClock` is the script position in seconds. It is written only by the
//! controller that owns the active timeline and read by everyone else as a single
//! atomic snapshot. `HostClock` is the host's notion of real elapsed time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    bits: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in seconds.
    pub fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }

    /// Moves the clock to an absolute position. Used for resynchronization.
    pub fn rebase(&self, seconds: f64) {
        self.set(seconds);
    }

    pub fn advance(&self, delta: Duration) -> f64 {
        let next = self.now() + delta.as_secs_f64();
        self.set(next);
        next
    }

    fn set(&self, seconds: f64) {
        let value = if seconds.is_finite() { seconds } else { 0.0 };
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

pub trait HostClock: Send + Sync {
    /// Real time elapsed since an arbitrary fixed origin.
    fn elapsed(&self) -> Duration;
}

pub struct SystemHostClock {
    origin: Instant,
}

impl SystemHostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemHostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for SystemHostClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Host clock moved by hand, for replaying recorded logs.
#[derive(Clone, Debug, Default)]
pub struct ManualHostClock {
    millis: Arc<AtomicU64>,
}

impl ManualHostClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, elapsed: Duration) {
        self.millis
            .store(elapsed.as_millis() as u64, Ordering::Release);
    }

    pub fn advance(&self, delta: Duration) {
        self.millis
            .fetch_add(delta.as_millis() as u64, Ordering::AcqRel);
    }
}

impl HostClock for ManualHostClock {
    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Acquire))
    }
}
