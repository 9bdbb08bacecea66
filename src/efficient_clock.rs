//! Monotonic timestamp source for record headers.
//!
//! Record timestamps are nanoseconds on a monotonic clock, measured from a
//! process-wide epoch captured the first time the clock is read. They are
//! comparable across threads and never go backwards, but carry no wall-clock
//! meaning.

use std::time::Instant;

use lazy_static::lazy_static;

lazy_static! {
    /// Process-wide origin for all record timestamps.
    static ref EPOCH: Instant = Instant::now();
}

/// Returns nanoseconds elapsed since the process-wide epoch.
///
/// The first call pins the epoch, so it returns a value close to 0.
/// Saturates at `u64::MAX` (roughly 584 years of uptime).
///
/// # Examples
///
/// ```
/// # use ring_logger::efficient_clock::monotonic_nanos;
/// let a = monotonic_nanos();
/// let b = monotonic_nanos();
/// assert!(b >= a);
/// ```
#[inline(always)]
pub fn monotonic_nanos() -> u64 {
    u64::try_from(EPOCH.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Forces the epoch to be captured now.
///
/// Called when a logger is constructed so the first record does not pay for
/// the lazy initialization.
pub fn init_epoch() {
    lazy_static::initialize(&EPOCH);
}
