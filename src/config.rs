use std::time::Duration;

use crate::error::{Result, RingLogError};
use crate::level::Level;
use crate::record::HEADER_SIZE;

/// Default number of slots (must be power of 2)
pub const DEFAULT_RING_CAPACITY: usize = 16 * 1024;

/// Default bytes per slot, also the size of each producer's scratch buffer
pub const DEFAULT_SLOT_CAPACITY: usize = 4096;

/// Longest an idle consumer sleeps before it looks at the producer cursor
/// again, and so the worst-case delivery latency for a record written to an
/// empty ring.
///
/// Producers never wake the consumer, since that would put a syscall on the
/// write path. A sub-microsecond park is not achievable in practice: Linux
/// rounds timed sleeps up by the thread's timer slack (50 µs by default), so
/// shorter values only add wakeups. Lower it (and the timer slack) when
/// idle latency matters more than an idle core.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_micros(50);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_THREAD_NAME: &str = "ring-logger-worker";

/// How producers coordinate when publishing into the ring.
///
/// `Single` can only be selected through the `unsafe`
/// [`RingLoggerConfig::assume_single_producer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerMode {
    /// Read cursor, write slot, bump cursor. No claim step, but two threads
    /// publishing at the same moment would write the same slot.
    Single,
    /// Each producer reserves a sequence with a fetch-add before writing and
    /// then waits for every earlier sequence to become visible before making
    /// its own visible. Safe for any number of producers; a producer can
    /// briefly spin on a slower peer.
    #[default]
    Claimed,
}

/// Scheduling priority requested for the consumer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerPriority {
    /// Keep whatever the spawning thread has.
    #[default]
    Inherit,
    /// Set the thread's nice value (Linux only; lower is more favourable).
    /// Raising priority usually needs `CAP_SYS_NICE`; failure is logged and
    /// the thread keeps running at its inherited priority.
    Nice(i32),
}

/// Startup configuration, fixed for the lifetime of a logger.
#[derive(Debug, Clone)]
pub struct RingLoggerConfig {
    /// Number of slots (power of 2, at least 2)
    pub ring_capacity: usize,
    /// Bytes per slot, header included
    pub slot_capacity: usize,
    /// Records below this level are discarded at the call site
    pub min_level: Level,
    pub consumer_priority: ConsumerPriority,
    producer_mode: ProducerMode,
    /// Upper bound on how long the idle consumer parks before re-checking
    pub idle_wait: Duration,
    /// How long `shutdown` waits for the consumer to drain
    pub shutdown_timeout: Duration,
    pub thread_name: String,
}

impl Default for RingLoggerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            min_level: Level::Info,
            consumer_priority: ConsumerPriority::Inherit,
            producer_mode: ProducerMode::Claimed,
            idle_wait: DEFAULT_IDLE_WAIT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl RingLoggerConfig {
    /// Create a configuration with the given ring capacity
    pub fn new(ring_capacity: usize) -> Result<Self> {
        let config = Self {
            ring_capacity,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_slot_capacity(mut self, slot_capacity: usize) -> Result<Self> {
        self.slot_capacity = slot_capacity;
        self.validate()?;
        Ok(self)
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_consumer_priority(mut self, priority: ConsumerPriority) -> Self {
        self.consumer_priority = priority;
        self
    }

    pub fn producer_mode(&self) -> ProducerMode {
        self.producer_mode
    }

    /// Switches producers to [`ProducerMode::Single`], dropping the claim
    /// step from every write.
    ///
    /// # Safety
    ///
    /// For the whole life of the logger, at most one thread at a time may
    /// call its write methods (`write_str`, `write_bytes`, `write_fmt`,
    /// `ring_log!`). Overlapping writes from two threads are a data race on
    /// slot memory.
    ///
    /// Selecting the mode is itself `unsafe`:
    ///
    /// ```compile_fail
    /// # use ring_logger::RingLoggerConfig;
    /// let config = RingLoggerConfig::default().assume_single_producer();
    /// ```
    pub unsafe fn assume_single_producer(mut self) -> Self {
        self.producer_mode = ProducerMode::Single;
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity < 2 || !self.ring_capacity.is_power_of_two() {
            return Err(RingLogError::config(
                "ring capacity must be a power of 2 and at least 2",
            ));
        }
        if self.slot_capacity <= HEADER_SIZE {
            return Err(RingLogError::config(format!(
                "slot capacity must exceed the {HEADER_SIZE}-byte record header"
            )));
        }
        if self.slot_capacity > i32::MAX as usize {
            return Err(RingLogError::config("slot capacity must fit in an i32"));
        }
        if self
            .ring_capacity
            .checked_mul(self.slot_capacity)
            .is_none()
        {
            return Err(RingLogError::config("ring storage size overflows usize"));
        }
        if self.idle_wait.is_zero() {
            return Err(RingLogError::config("idle wait must be greater than 0"));
        }
        if self.thread_name.contains('\0') {
            return Err(RingLogError::config("thread name must not contain NUL"));
        }
        Ok(())
    }
}
