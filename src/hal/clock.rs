//! Wall clock readable from an ISR.
//!
//! `gettimeofday` takes a lock, so the wall-clock offset is sampled once in
//! task context and added to `esp_timer_get_time()` at read time.

use core::ptr;

use esp_idf_svc::sys::{esp_timer_get_time, gettimeofday, timeval};
use portable_atomic::{AtomicI64, Ordering};

use crate::clock::Clock;

pub struct EspClock {
    /// Wall-clock microseconds at boot.
    epoch_offset_us: AtomicI64,
}

impl EspClock {
    /// Create and sample the current wall-clock offset.
    pub fn new() -> Self {
        let clock = Self { epoch_offset_us: AtomicI64::new(0) };
        clock.resync();
        clock
    }

    /// Re-sample the wall-clock offset after the system time was set.
    ///
    /// Task context only.
    pub fn resync(&self) {
        let mut tv = timeval { tv_sec: 0, tv_usec: 0 };
        // SAFETY: tv is a valid out-pointer, timezone is unused.
        let wall_us = if unsafe { gettimeofday(&mut tv, ptr::null_mut()) } == 0 {
            (tv.tv_sec as i64) * 1_000_000 + tv.tv_usec as i64
        } else {
            0
        };
        self.epoch_offset_us.store(wall_us - uptime_us(), Ordering::Release);
    }

    fn wall_us(&self) -> i64 {
        self.epoch_offset_us.load(Ordering::Acquire) + uptime_us()
    }
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

fn uptime_us() -> i64 {
    // SAFETY: esp_timer_get_time is ISR-safe and has no preconditions.
    unsafe { esp_timer_get_time() }
}

impl Clock for EspClock {
    fn real_seconds(&self) -> i64 {
        self.wall_us().div_euclid(1_000_000)
    }

    fn real_ns(&self) -> u64 {
        (self.wall_us().max(0) as u64) * 1_000
    }

    fn monotonic_ns(&self) -> u64 {
        (uptime_us().max(0) as u64) * 1_000
    }
}
