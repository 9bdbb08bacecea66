//! Rate-limited reporting for failures inside the logger itself.
//!
//! Failures on the write path and in sinks are never returned to the
//! application; they are reported here through `tracing` instead. Under a
//! persistent failure (a full disk behind a file sink, a `Display` impl that
//! always errors) one event per interval is emitted, carrying the number of
//! occurrences suppressed since the previous one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::efficient_clock::monotonic_nanos;

/// Default interval between reports of the same kind
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Never-blocking rate limiter in front of a `tracing` event.
///
/// Safe to call from producer threads: the interval check is a single
/// compare-exchange, no lock is taken.
#[derive(Debug)]
pub struct RateLimitedReporter {
    what: &'static str,
    min_interval_nanos: u64,
    /// Monotonic nanos of the last emitted event, 0 = never.
    last_report: AtomicU64,
    suppressed: AtomicU64,
    total: AtomicU64,
}

impl RateLimitedReporter {
    pub const fn new(what: &'static str, min_interval: Duration) -> Self {
        let nanos = min_interval.as_nanos();
        Self {
            what,
            min_interval_nanos: if nanos > u64::MAX as u128 {
                u64::MAX
            } else {
                nanos as u64
            },
            last_report: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Total occurrences reported or suppressed.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Records one occurrence and emits a `warn!` event if the interval has
    /// passed. Returns whether an event was emitted.
    pub fn report(&self, error: &dyn fmt::Display) -> bool {
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;

        // +1 keeps "never reported" (0) distinct from a report at the epoch.
        let now = monotonic_nanos().saturating_add(1);
        let last = self.last_report.load(Ordering::Relaxed);
        let due = last == 0 || now.saturating_sub(last) >= self.min_interval_nanos;
        if !due
            || self
                .last_report
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
        if suppressed > 0 {
            tracing::warn!(
                target: "ring_logger",
                what = self.what,
                error = %error,
                suppressed_count = suppressed,
                total,
                "logger failure (rate-limited)"
            );
        } else {
            tracing::warn!(
                target: "ring_logger",
                what = self.what,
                error = %error,
                total,
                "logger failure"
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_report_emits() {
        let reporter = RateLimitedReporter::new("test", Duration::from_secs(60));
        assert!(reporter.report(&"boom"));
        assert!(!reporter.report(&"boom"));
        assert!(!reporter.report(&"boom"));
        assert_eq!(reporter.total(), 3);
    }

    #[test]
    fn test_zero_interval_always_emits() {
        let reporter = RateLimitedReporter::new("test", Duration::ZERO);
        assert!(reporter.report(&"a"));
        assert!(reporter.report(&"b"));
    }
}
