//! Tick clock - periodic and one-shot timers over a wrapping millisecond
//! uptime, plus the randomness used for reconnection jitter.
//!
//! Uptime is a `u32` that wraps after ~49.7 days.  It is only ever
//! subtracted (wrapping) to form deltas, never compared directly, except
//! by the role arbiter, which compares two uptimes as plain numbers.

use crate::config::{JITTER_MAX_MS, JITTER_MIN_MS};

/// Monotonic millisecond uptime source.
pub trait Uptime {
    fn now_ms(&self) -> u32;
}

/// Source of uniformly distributed `u32`s.
pub trait RandomSource {
    fn next_u32(&mut self) -> u32;
}

/// Wrap-safe `now - since`.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Post-disconnect back-off, uniform over `[JITTER_MIN_MS, JITTER_MAX_MS)`.
pub fn jitter_ms<R: RandomSource>(rng: &mut R) -> u32 {
    JITTER_MIN_MS + rng.next_u32() % (JITTER_MAX_MS - JITTER_MIN_MS)
}

/// Periodic timer that keeps its phase.
///
/// [`Periodic::advance`] moves the reference point by exactly one period,
/// so a late iteration does not shift later firings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Periodic {
    last: u32,
    period: u32,
}

impl Periodic {
    pub const fn new(period: u32, now: u32) -> Self {
        Self { last: now, period }
    }

    pub fn is_due(&self, now: u32) -> bool {
        elapsed(now, self.last) >= self.period
    }

    /// Consume one period.
    pub fn advance(&mut self) {
        self.last = self.last.wrapping_add(self.period);
    }

    /// Re-anchor the period at `now`.
    pub fn restart(&mut self, now: u32) {
        self.last = now;
    }

    pub fn set_last(&mut self, last: u32) {
        self.last = last;
    }

    pub fn since_last(&self, now: u32) -> u32 {
        elapsed(now, self.last)
    }

    pub fn period(&self) -> u32 {
        self.period
    }
}

/// One-shot timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    start: u32,
    duration: u32,
}

impl Deadline {
    pub const fn after(now: u32, duration: u32) -> Self {
        Self {
            start: now,
            duration,
        }
    }

    pub fn expired(&self, now: u32) -> bool {
        elapsed(now, self.start) >= self.duration
    }
}

/// Small xorshift generator.
///
/// The firmware seeds it from the SoftDevice's hardware RNG; tests seed it
/// from the node address so every run is reproducible.
#[derive(Clone, Debug)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub const fn new(seed: u32) -> Self {
        // Zero is the one fixed point of xorshift.
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }
}

impl RandomSource for XorShift32 {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}
