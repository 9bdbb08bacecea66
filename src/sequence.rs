use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence counter that owns its cache line(s).
///
/// The producer cursor and the consumer cursor are bumped by different
/// threads at high rates. If they shared a cache line every increment on one
/// side would invalidate the line on the other core. Aligning to 128 bytes
/// covers both the common 64-byte line and the adjacent-line prefetcher on
/// x86_64 and the 128-byte lines on Apple silicon, so nothing else can ever
/// land next to the counter.
///
/// Operations:
///
/// * [`get`](Self::get) - any thread
/// * [`increment_and_get`](Self::increment_and_get) - the writing role
/// * [`set`](Self::set) - the owning role
/// * [`advance_to`](Self::advance_to) - any role that may only move the
///   counter forward
#[repr(align(128))]
#[derive(Debug, Default)]
pub struct PaddedSequence {
    value: AtomicU64,
}

impl PaddedSequence {
    pub const fn new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// Acquire load; pairs with the release half of `increment_and_get`/`set`.
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Adds one and returns the post-increment value.
    #[inline(always)]
    pub fn increment_and_get(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline(always)]
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Raises the counter to `value` unless it is already there. Returns the
    /// previous value.
    #[inline(always)]
    pub fn advance_to(&self, value: u64) -> u64 {
        self.value.fetch_max(value, Ordering::AcqRel)
    }
}
