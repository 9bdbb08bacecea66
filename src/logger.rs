use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::{ProducerMode, RingLoggerConfig};
use crate::consumer::{self, Shared};
use crate::diagnostics::{RateLimitedReporter, DEFAULT_REPORT_INTERVAL};
use crate::efficient_clock::{init_epoch, monotonic_nanos};
use crate::error::{Result, RingLogError};
use crate::level::Level;
use crate::record::{encode_header, max_message_len, HEADER_SIZE, MESSAGE_OFFSET};
use crate::ring::RingBuffer;
use crate::sink::Sink;
use crate::stats::{ConsumerCounters, LoggerStats};

thread_local! {
    /// Per-thread encode buffer, grown on first use and reused forever after.
    static SCRATCH: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Why a producer-side write was abandoned.
#[derive(Debug, thiserror::Error)]
enum WriteFailure {
    #[error("scratch buffer already in use on this thread (re-entrant write)")]
    Reentrant,
    #[error("thread-local scratch buffer unavailable during thread teardown")]
    ThreadTeardown,
    #[error("formatting the message failed")]
    Format,
    #[error("panic while formatting the message")]
    Panicked,
}

/// Handle to a ring logger and its consumer thread.
///
/// Construct one at startup and share it by reference (or inside an `Arc`)
/// with every thread that logs. Writes never block, never allocate after a
/// thread's first write, and never report failure to the caller: a record
/// either lands in the ring or is counted as dropped.
///
/// # Thread Safety
///
/// Any number of threads may write at once under the default
/// [`ProducerMode::Claimed`]. A config built with the `unsafe`
/// [`RingLoggerConfig::assume_single_producer`] drops the claim step and
/// makes the caller responsible for keeping writes on one thread at a time.
///
/// # Examples
///
/// ```
/// use ring_logger::{CollectingSink, Level, RingLogger, RingLoggerConfig};
/// use std::time::Duration;
///
/// let sink = CollectingSink::new();
/// let config = RingLoggerConfig::new(1024).unwrap();
/// let logger = RingLogger::new(config, sink.clone()).unwrap();
///
/// logger.write_str(Level::Info, 1, "service started");
/// logger.write_str(Level::Debug, 1, "filtered out");
///
/// logger.shutdown().unwrap();
/// assert_eq!(sink.messages(), vec!["service started"]);
/// ```
pub struct RingLogger {
    shared: Arc<Shared>,
    min_level: AtomicU8,
    write_errors: RateLimitedReporter,
    consumer: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
    producer_mode: ProducerMode,
}

impl RingLogger {
    /// Allocates the ring and starts the consumer thread feeding `sink`.
    pub fn new<S: Sink>(config: RingLoggerConfig, sink: S) -> Result<Self> {
        config.validate()?;
        init_epoch();

        let ring = RingBuffer::new(config.ring_capacity, config.slot_capacity)?;
        let shared = Arc::new(Shared::new(ring));
        let handle = consumer::spawn(shared.clone(), sink, &config)?;

        info!(
            target: "ring_logger",
            ring_capacity = config.ring_capacity,
            slot_capacity = config.slot_capacity,
            min_level = %config.min_level,
            mode = ?config.producer_mode(),
            "ring logger started"
        );

        Ok(Self {
            shared,
            min_level: AtomicU8::new(config.min_level.as_u8()),
            write_errors: RateLimitedReporter::new("write", DEFAULT_REPORT_INTERVAL),
            consumer: Mutex::new(Some(handle)),
            shutdown_timeout: config.shutdown_timeout,
            producer_mode: config.producer_mode(),
        })
    }

    /// Starts a logger with [`RingLoggerConfig::default`].
    pub fn with_sink<S: Sink>(sink: S) -> Result<Self> {
        Self::new(RingLoggerConfig::default(), sink)
    }

    /// Whether a record at `level` would be kept.
    ///
    /// The threshold is read relaxed: a change made by
    /// [`set_min_level`](Self::set_min_level) on another thread is picked up
    /// eventually, not necessarily by the very next write.
    #[inline(always)]
    pub fn enabled(&self, level: Level) -> bool {
        level.as_u8() >= self.min_level.load(Ordering::Relaxed)
    }

    pub fn set_min_level(&self, level: Level) {
        self.min_level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn min_level(&self) -> Level {
        Level::from_u8(self.min_level.load(Ordering::Relaxed)).unwrap_or(Level::Trace)
    }

    /// Logs a UTF-8 message. Truncated to the slot's message capacity.
    #[inline]
    pub fn write_str(&self, level: Level, component_id: u8, message: &str) {
        self.write_bytes(level, component_id, message.as_bytes());
    }

    /// Logs raw bytes. Truncated to the slot's message capacity.
    pub fn write_bytes(&self, level: Level, component_id: u8, message: &[u8]) {
        if !self.enabled(level) {
            return;
        }
        self.encode_and_publish(level, component_id, |body| {
            let len = message.len().min(body.len());
            body[..len].copy_from_slice(&message[..len]);
            Ok(len)
        });
    }

    /// Formats `args` straight into the thread's scratch buffer, without an
    /// intermediate `String`.
    ///
    /// Output beyond the slot's message capacity is cut at the last complete
    /// UTF-8 character that fits. A `Display` impl that fails or panics only
    /// costs this record. Usually called through [`ring_log!`](crate::ring_log).
    pub fn write_fmt(&self, level: Level, component_id: u8, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        self.encode_and_publish(level, component_id, |body| {
            let mut writer = TruncatingWriter { buf: body, pos: 0 };
            match panic::catch_unwind(AssertUnwindSafe(|| fmt::write(&mut writer, args))) {
                Ok(Ok(())) => Ok(writer.pos),
                Ok(Err(_)) => Err(WriteFailure::Format),
                Err(_) => Err(WriteFailure::Panicked),
            }
        });
    }

    /// Encodes header + body into the thread-local scratch buffer and
    /// publishes it. `fill` writes the message into the slice it is given
    /// and returns the byte count.
    #[inline]
    fn encode_and_publish<F>(&self, level: Level, component_id: u8, fill: F)
    where
        F: FnOnce(&mut [u8]) -> std::result::Result<usize, WriteFailure>,
    {
        if !self.shared.running.load(Ordering::Relaxed) {
            return;
        }

        let ring = &self.shared.ring;
        let slot_capacity = ring.slot_capacity();

        let outcome = SCRATCH
            .try_with(|cell| {
                let mut scratch = cell.try_borrow_mut().map_err(|_| WriteFailure::Reentrant)?;
                if scratch.len() < slot_capacity {
                    scratch.resize(slot_capacity, 0);
                }
                let buf = &mut scratch[..slot_capacity];

                let timestamp = monotonic_nanos();
                let body_capacity = max_message_len(slot_capacity);
                let len = fill(&mut buf[MESSAGE_OFFSET..MESSAGE_OFFSET + body_capacity])?;
                encode_header(buf, timestamp, level, component_id, len);

                let encoded = &buf[..HEADER_SIZE + len];
                match self.producer_mode {
                    ProducerMode::Claimed => ring.publish(encoded),
                    // SAFETY: `Single` is only reachable through the unsafe
                    // `assume_single_producer`, whose caller promised that
                    // writes never overlap.
                    ProducerMode::Single => unsafe { ring.publish_single(encoded) },
                };
                Ok(())
            })
            .unwrap_or(Err(WriteFailure::ThreadTeardown));

        if let Err(failure) = outcome {
            self.write_errors.report(&failure);
        }
    }

    /// Stops the consumer after it drains everything published so far.
    ///
    /// Waits up to the configured shutdown timeout. On timeout the consumer
    /// is left to finish in the background and
    /// [`RingLogError::ShutdownTimeout`] is returned; callers should treat
    /// delivery as best-effort in that case. Records dropped earlier by the
    /// overflow policy are never recovered.
    ///
    /// Writes issued after shutdown are ignored.
    pub fn shutdown(&self) -> Result<()> {
        let handle = self
            .consumer
            .lock()
            .take()
            .ok_or(RingLogError::AlreadyShutdown)?;

        self.shared.running.store(false, Ordering::Release);
        handle.thread().unpark();

        if !self.shared.wait_finished(self.shutdown_timeout) {
            let pending = self.shared.ring.len() as u64;
            warn!(
                target: "ring_logger",
                pending,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "consumer did not drain before shutdown timeout"
            );
            return Err(RingLogError::ShutdownTimeout { pending });
        }

        if handle.join().is_err() {
            error!(target: "ring_logger", "consumer thread panicked");
        }
        let stats = self.stats();
        info!(
            target: "ring_logger",
            published = stats.published,
            delivered = stats.delivered,
            dropped_overflow = stats.dropped_overflow,
            "ring logger stopped"
        );
        Ok(())
    }

    /// Whether the consumer thread is still accepting records.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn ring_capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    pub fn slot_capacity(&self) -> usize {
        self.shared.ring.slot_capacity()
    }

    pub fn stats(&self) -> LoggerStats {
        let ring = &self.shared.ring;
        let counters = &self.shared.counters;
        LoggerStats {
            published: ring.producer_cursor(),
            delivered: ConsumerCounters::read(&counters.delivered),
            dropped_overflow: ring.dropped_overflow(),
            dropped_errors: self.write_errors.total(),
            sink_failures: ConsumerCounters::read(&counters.sink_failures),
            decode_failures: ConsumerCounters::read(&counters.decode_failures),
            skipped_overwritten: ConsumerCounters::read(&counters.skipped_overwritten),
        }
    }
}

impl Drop for RingLogger {
    fn drop(&mut self) {
        if self.consumer.get_mut().is_some() {
            if let Err(err) = self.shutdown() {
                warn!(target: "ring_logger", error = %err, "shutdown on drop incomplete");
            }
        }
    }
}

impl fmt::Debug for RingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingLogger")
            .field("ring_capacity", &self.ring_capacity())
            .field("slot_capacity", &self.slot_capacity())
            .field("min_level", &self.min_level())
            .field("running", &self.is_running())
            .finish()
    }
}

/// `fmt::Write` into a fixed slice that silently stops at the end, never
/// splitting a UTF-8 character.
struct TruncatingWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl fmt::Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.buf.len() - self.pos;
        let mut n = s.len().min(remaining);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.buf[self.pos..self.pos + n].copy_from_slice(&s.as_bytes()[..n]);
        self.pos += n;
        Ok(())
    }
}

/// Logs a formatted record without allocating.
///
/// The level check happens before any argument is formatted.
///
/// # Examples
///
/// ```
/// # use ring_logger::{ring_log, CollectingSink, Level, RingLogger};
/// # let sink = CollectingSink::new();
/// # let logger = RingLogger::with_sink(sink.clone()).unwrap();
/// let port = 8080;
/// ring_log!(logger, Level::Info, 3, "listening on port {}", port);
/// # logger.shutdown().unwrap();
/// # assert_eq!(sink.messages(), vec!["listening on port 8080"]);
/// ```
#[macro_export]
macro_rules! ring_log {
    ($logger:expr, $level:expr, $component:expr, $($arg:tt)+) => {{
        let logger = &$logger;
        let level = $level;
        if logger.enabled(level) {
            logger.write_fmt(level, $component, ::std::format_args!($($arg)+));
        }
    }};
}
