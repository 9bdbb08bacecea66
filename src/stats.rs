use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for one logger.
///
/// Counters are read independently, so a snapshot taken while producers are
/// active is only approximately consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Records published into the ring.
    pub published: u64,
    /// Records handed to the sink without error.
    pub delivered: u64,
    /// Records sacrificed by the drop-oldest policy.
    pub dropped_overflow: u64,
    /// Writes abandoned on the producer side (formatting error, re-entrant
    /// write from inside a `Display` impl, panic while formatting).
    pub dropped_errors: u64,
    /// Records the sink rejected or panicked on.
    pub sink_failures: u64,
    /// Slots whose contents did not decode as a record.
    pub decode_failures: u64,
    /// Slots overwritten by a producer while the consumer was reading them.
    pub skipped_overwritten: u64,
}

/// Counters written by the consumer thread.
#[derive(Debug, Default)]
pub(crate) struct ConsumerCounters {
    pub delivered: AtomicU64,
    pub sink_failures: AtomicU64,
    pub decode_failures: AtomicU64,
    pub skipped_overwritten: AtomicU64,
}

impl ConsumerCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
