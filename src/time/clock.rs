//! Monotonic nanosecond clock built from raw hardware timer ticks.
//!
//! The counter may be narrower than 64 bits and may wrap between updates;
//! deltas are computed with wraparound-tolerant unsigned arithmetic masked
//! to the counter width. Conversion to nanoseconds uses fixed-point
//! accumulation — no floating point, and no precision loss on small deltas:
//! the sub-tick remainder (in ticks x 1e9) is carried in `accumulator`,
//! which stays strictly below the input frequency after every update. That
//! remainder invariant is what keeps the clock drift-free: the final time
//! is the exact floor of the total accumulated nanoseconds no matter how
//! the updates were batched.
//!
//! All access runs inside the critical section — thread-context reads via
//! `nano_time` race with tick updates from interrupt context otherwise.

use crate::errors::{ClockError, KernelResult};
use crate::time::NANOS_PER_SEC;

/// Fixed-point tick-to-nanosecond converter.
pub struct Clock {
    /// Cumulative nanoseconds; monotonic, never decreases
    time: u64,
    /// Last observed hardware counter value
    prev_count: u64,
    /// Sub-tick remainder in ticks x 1e9; `< frequency` after each update
    accumulator: u64,
    /// Counter input frequency in Hz
    frequency: u64,
    /// Counter wrap mask derived from the counter width
    mask: u64,
}

impl Clock {
    /// Build a clock over a counter of the given frequency and width.
    ///
    /// Fails on a zero frequency or a width outside `1..=64`; no partially
    /// constructed clock is ever observable.
    pub fn new(frequency_hz: u64, width_bits: u32) -> KernelResult<Self> {
        if frequency_hz == 0 {
            return Err(ClockError::ZeroFrequency.into());
        }
        if width_bits == 0 || width_bits > 64 {
            return Err(ClockError::BadWidth(width_bits).into());
        }
        let mask = if width_bits == 64 {
            u64::MAX
        } else {
            (1u64 << width_bits) - 1
        };
        Ok(Self {
            time: 0,
            prev_count: 0,
            accumulator: 0,
            frequency: frequency_hz,
            mask,
        })
    }

    /// Fold the counter value observed now into the running time.
    ///
    /// Returns the number of whole nanoseconds the clock advanced by. The
    /// delta must be within the counter's representable range (at most one
    /// wrap since the previous update).
    pub fn update(&mut self, current_count: u64) -> u64 {
        let delta = current_count.wrapping_sub(self.prev_count) & self.mask;
        self.prev_count = current_count & self.mask;

        // 2^64 ticks x 1e9 overflows u64; do the division in u128 and fold
        // the sub-tick remainder back into the 64-bit accumulator.
        let acc = self.accumulator as u128 + delta as u128 * NANOS_PER_SEC as u128;
        let whole_ns = acc / self.frequency as u128;
        self.accumulator = (acc - whole_ns * self.frequency as u128) as u64;
        self.time = self.time.wrapping_add(whole_ns as u64);
        whole_ns as u64
    }

    /// Cumulative nanoseconds as of the last update.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Input frequency in Hz.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }
}
