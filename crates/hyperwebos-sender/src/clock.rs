//! Microsecond time source for the frame gate and the stats window.

use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Monotonic microseconds since an arbitrary origin.
    fn now_us(&self) -> u64;
}

/// `CLOCK_MONOTONIC`-backed clock, origin at construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct ManualClock(std::sync::Arc<std::sync::atomic::AtomicU64>);

#[cfg(test)]
impl ManualClock {
    pub fn at_ms(ms: u64) -> Self {
        let clock = Self::default();
        clock.set_us(ms * 1_000);
        clock
    }

    pub fn set_us(&self, us: u64) {
        self.0.store(us, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.0.fetch_add(ms * 1_000, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
