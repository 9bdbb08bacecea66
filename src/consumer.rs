//! The background thread that drains the ring into a sink.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::config::{ConsumerPriority, RingLoggerConfig};
use crate::diagnostics::{RateLimitedReporter, DEFAULT_REPORT_INTERVAL};
use crate::error::{Result, RingLogError};
use crate::record;
use crate::ring::{RingBuffer, SlotRead};
use crate::sink::Sink;
use crate::stats::ConsumerCounters;

/// State shared between the logger handle, producers and the consumer.
pub(crate) struct Shared {
    pub ring: RingBuffer,
    pub running: AtomicBool,
    pub counters: ConsumerCounters,
    sink_errors: RateLimitedReporter,
    decode_errors: RateLimitedReporter,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl Shared {
    pub fn new(ring: RingBuffer) -> Self {
        Self {
            ring,
            running: AtomicBool::new(true),
            counters: ConsumerCounters::default(),
            sink_errors: RateLimitedReporter::new("sink", DEFAULT_REPORT_INTERVAL),
            decode_errors: RateLimitedReporter::new("decode", DEFAULT_REPORT_INTERVAL),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
        }
    }

    /// Waits for the consumer thread to leave its loop. Returns `false` on
    /// timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let mut finished = self.finished.lock();
        if !*finished {
            let _ = self.finished_cv.wait_for(&mut finished, timeout);
        }
        *finished
    }

    fn mark_finished(&self) {
        *self.finished.lock() = true;
        self.finished_cv.notify_all();
    }
}

/// Signals completion even if the loop unwinds.
struct FinishGuard<'a>(&'a Shared);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_finished();
    }
}

/// Starts the consumer thread for `shared`, delivering into `sink`.
pub(crate) fn spawn<S: Sink>(
    shared: Arc<Shared>,
    sink: S,
    config: &RingLoggerConfig,
) -> Result<JoinHandle<()>> {
    let idle_wait = config.idle_wait;
    let priority = config.consumer_priority;

    thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let _finish = FinishGuard(&shared);
            apply_priority(priority);
            Consumer::new(&shared, sink, idle_wait).run();
        })
        .map_err(RingLogError::Spawn)
}

struct Consumer<'a, S> {
    shared: &'a Shared,
    sink: S,
    /// Private copy of the slot being delivered; the sink reads from here,
    /// never from ring memory.
    scratch: Box<[u8]>,
    idle_wait: Duration,
}

impl<'a, S: Sink> Consumer<'a, S> {
    fn new(shared: &'a Shared, sink: S, idle_wait: Duration) -> Self {
        let scratch = vec![0u8; shared.ring.slot_capacity()].into_boxed_slice();
        Self {
            shared,
            sink,
            scratch,
            idle_wait,
        }
    }

    fn run(mut self) {
        let shared = self.shared;
        let ring = &shared.ring;
        let mut cursor = ring.consumer_cursor();
        let mut pending_flush = false;
        debug!(target: "ring_logger", cursor, "consumer started");

        loop {
            let published = ring.producer_cursor();

            if cursor < published {
                // Skip whatever the drop-oldest policy gave away while we
                // were parked or busy.
                cursor = cursor
                    .max(ring.consumer_cursor())
                    .max(ring.oldest_retained(published));
                if cursor >= published {
                    continue;
                }

                // The slot is released as soon as it is copied out, so a slow
                // sink does not hold ring space.
                let read = ring.read_into(cursor, &mut self.scratch);
                ring.commit_consumed(cursor + 1);
                self.deliver(cursor, read);
                cursor += 1;
                pending_flush = true;
                continue;
            }

            if !shared.running.load(Ordering::Acquire) {
                // Stop was requested; leave only once nothing new arrived
                // after the flag flipped.
                if cursor >= ring.producer_cursor() {
                    break;
                }
                continue;
            }

            if pending_flush {
                self.flush();
                pending_flush = false;
            }
            thread::park_timeout(self.idle_wait);
        }

        self.flush();
        debug!(target: "ring_logger", cursor, "consumer drained and stopped");
    }

    fn deliver(&mut self, seq: u64, read: SlotRead) {
        let Self {
            shared,
            sink,
            scratch,
            ..
        } = self;
        let counters = &shared.counters;

        let len = match read {
            SlotRead::Ready(len) => len,
            SlotRead::Overwritten => {
                ConsumerCounters::bump(&counters.skipped_overwritten);
                debug!(target: "ring_logger", seq, "slot overwritten before it could be read");
                return;
            }
            SlotRead::Corrupt(err) => {
                ConsumerCounters::bump(&counters.decode_failures);
                shared.decode_errors.report(&err);
                return;
            }
        };

        let view = match record::decode(&scratch[..len]) {
            Ok(view) => view,
            Err(err) => {
                ConsumerCounters::bump(&counters.decode_failures);
                shared.decode_errors.report(&err);
                return;
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(|| sink.write(&view))) {
            Ok(Ok(())) => ConsumerCounters::bump(&counters.delivered),
            Ok(Err(err)) => {
                ConsumerCounters::bump(&counters.sink_failures);
                shared.sink_errors.report(&err);
            }
            Err(_) => {
                ConsumerCounters::bump(&counters.sink_failures);
                shared
                    .sink_errors
                    .report(&io::Error::new(io::ErrorKind::Other, "sink panicked"));
            }
        }
    }

    fn flush(&mut self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.flush())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.shared.sink_errors.report(&err);
            }
            Err(_) => {
                error!(target: "ring_logger", "sink panicked while flushing");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn apply_priority(priority: ConsumerPriority) {
    let ConsumerPriority::Nice(nice) = priority else {
        return;
    };

    // SAFETY: plain syscalls on the calling thread, no pointers involved.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, nice)
    };
    if rc != 0 {
        warn!(
            target: "ring_logger",
            nice,
            error = %io::Error::last_os_error(),
            "could not set consumer thread priority"
        );
    } else {
        debug!(target: "ring_logger", nice, "consumer thread priority set");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(priority: ConsumerPriority) {
    if let ConsumerPriority::Nice(nice) = priority {
        warn!(
            target: "ring_logger",
            nice,
            "consumer thread priority is only supported on Linux"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::record::{encode_into, LENGTH_OFFSET, LEVEL_OFFSET, MESSAGE_OFFSET};
    use crate::sink::CollectingSink;

    const WAIT: Duration = Duration::from_secs(5);

    fn encoded(msg: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 64];
        let n = encode_into(&mut buf, 1, Level::Info, 4, msg.as_bytes()).unwrap();
        buf.truncate(n);
        buf
    }

    fn start(sink: CollectingSink) -> (Arc<Shared>, JoinHandle<()>) {
        let config = RingLoggerConfig::new(8)
            .unwrap()
            .with_slot_capacity(64)
            .unwrap();
        let ring = RingBuffer::new(config.ring_capacity, config.slot_capacity).unwrap();
        let shared = Arc::new(Shared::new(ring));
        let handle = spawn(shared.clone(), sink, &config).unwrap();
        (shared, handle)
    }

    fn stop(shared: &Shared, handle: JoinHandle<()>) {
        shared.running.store(false, Ordering::Release);
        handle.thread().unpark();
        assert!(shared.wait_finished(WAIT));
        handle.join().unwrap();
    }

    #[test]
    fn test_bad_length_skipped_and_loop_continues() {
        let sink = CollectingSink::new();
        let (shared, handle) = start(sink.clone());

        shared.ring.publish(&encoded("before"));
        let mut bad = encoded("garbage");
        bad[LENGTH_OFFSET..MESSAGE_OFFSET].copy_from_slice(&1000i32.to_be_bytes());
        shared.ring.publish(&bad);
        shared.ring.publish(&encoded("after"));
        shared.ring.publish(&encoded("last"));
        stop(&shared, handle);

        assert_eq!(sink.messages(), vec!["before", "after", "last"]);
        let counters = &shared.counters;
        assert_eq!(ConsumerCounters::read(&counters.decode_failures), 1);
        assert_eq!(ConsumerCounters::read(&counters.delivered), 3);
    }

    #[test]
    fn test_unknown_level_skipped_and_loop_continues() {
        let sink = CollectingSink::new();
        let (shared, handle) = start(sink.clone());

        let mut bad = encoded("no level");
        bad[LEVEL_OFFSET] = 0;
        shared.ring.publish(&bad);
        shared.ring.publish(&encoded("fine"));
        stop(&shared, handle);

        assert_eq!(sink.messages(), vec!["fine"]);
        assert_eq!(ConsumerCounters::read(&shared.counters.decode_failures), 1);
    }
}
