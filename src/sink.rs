use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::level::Level;
use crate::record::{LogRecord, RecordView};

/// Destination for decoded records.
///
/// A sink is moved onto the consumer thread and called once per record, in
/// sequence order. The [`RecordView`] borrows a buffer that is reused for the
/// next record, so a sink that wants to keep data must copy it (for example
/// with [`RecordView::to_record`]).
///
/// An `Err` (or a panic) from [`write`](Sink::write) affects only that
/// record: it is counted, reported through `tracing`, and the consumer moves
/// on.
///
/// # Examples
///
/// ```
/// # use ring_logger::{RecordView, Sink};
/// # use std::io;
/// struct StderrSink;
///
/// impl Sink for StderrSink {
///     fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
///         eprintln!("{record}");
///         Ok(())
///     }
/// }
/// ```
pub trait Sink: Send + 'static {
    fn write(&mut self, record: &RecordView<'_>) -> io::Result<()>;

    /// Called when the consumer runs out of records and once more after the
    /// final drain at shutdown.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<F> Sink for F
where
    F: FnMut(&RecordView<'_>) -> io::Result<()> + Send + 'static,
{
    fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
        self(record)
    }
}

/// Renders `[timestamp] [LEVEL] [Component-id] message`, one line per record.
/// `ERROR` goes to stderr, everything else to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
        if record.level() >= Level::Error {
            writeln!(io::stderr().lock(), "{record}")
        } else {
            writeln!(io::stdout().lock(), "{record}")
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        io::stderr().flush()
    }
}

/// Writes each record's encoded bytes, unchanged, to `W`.
///
/// The output is a stream of back-to-back records that
/// [`RecordReader`](crate::log_reader::RecordReader) can read back. Wrap
/// files in a `BufWriter`; it is flushed whenever the consumer goes idle.
#[derive(Debug)]
pub struct BinaryWriterSink<W> {
    writer: W,
}

impl<W: Write + Send + 'static> BinaryWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send + 'static> Sink for BinaryWriterSink<W> {
    fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
        self.writer.write_all(record.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Forwards records to whatever backend is installed for the `log` crate.
///
/// Levels map one to one (`TRACE` -> `log::Level::Trace`, ...). The component
/// id is kept as a `[Component-id]` prefix on the message.
#[derive(Debug, Clone, Copy)]
pub struct LogFacadeSink {
    target: &'static str,
}

impl LogFacadeSink {
    pub const DEFAULT_TARGET: &'static str = "ring_logger";

    pub fn new() -> Self {
        Self::with_target(Self::DEFAULT_TARGET)
    }

    pub fn with_target(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogFacadeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for LogFacadeSink {
    fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
        let logger = log::logger();
        let metadata = log::Metadata::builder()
            .level(record.level().into())
            .target(self.target)
            .build();
        if logger.enabled(&metadata) {
            logger.log(
                &log::Record::builder()
                    .metadata(metadata)
                    .args(format_args!(
                        "[Component-{}] {}",
                        record.component_id(),
                        record.message_lossy()
                    ))
                    .build(),
            );
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        log::logger().flush();
        Ok(())
    }
}

/// In-memory collector, mostly for tests.
///
/// Clones share the same storage, so keep one clone and hand the other to
/// the logger.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    shared: Arc<(Mutex<Vec<LogRecord>>, Condvar)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.shared.0.lock().clone()
    }

    /// Messages decoded as UTF-8 (lossily), in delivery order.
    pub fn messages(&self) -> Vec<String> {
        self.shared
            .0
            .lock()
            .iter()
            .map(|r| r.message_lossy().into_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.shared.0.lock().clear();
    }

    /// Blocks until at least `count` records have arrived or `timeout`
    /// elapses. Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (records, arrived) = &*self.shared;
        let mut guard = records.lock();
        while guard.len() < count {
            if arrived.wait_until(&mut guard, deadline).timed_out() {
                return guard.len() >= count;
            }
        }
        true
    }
}

impl Sink for CollectingSink {
    fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
        let (records, arrived) = &*self.shared;
        records.lock().push(record.to_record());
        arrived.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode, encode_into};

    fn with_view<R>(level: Level, msg: &[u8], f: impl FnOnce(&RecordView<'_>) -> R) -> R {
        let mut buf = [0u8; 128];
        let n = encode_into(&mut buf, 55, level, 2, msg).unwrap();
        let view = decode(&buf[..n]).unwrap();
        f(&view)
    }

    #[test]
    fn test_closure_sink() {
        let mut sink = |r: &RecordView<'_>| -> io::Result<()> {
            if r.message() == b"bad" {
                return Err(io::Error::new(io::ErrorKind::Other, "rejected"));
            }
            Ok(())
        };
        assert!(with_view(Level::Info, b"ok", |v| sink.write(v)).is_ok());
        assert!(with_view(Level::Info, b"bad", |v| sink.write(v)).is_err());
    }

    #[test]
    fn test_binary_writer_sink_emits_encoded_bytes() {
        let mut sink = BinaryWriterSink::new(Vec::new());
        let raw = with_view(Level::Warn, b"payload", |v| {
            sink.write(v).unwrap();
            v.as_bytes().to_vec()
        });
        assert_eq!(sink.writer, raw);
    }

    #[test]
    fn test_collecting_sink_shares_storage() {
        let collector = CollectingSink::new();
        let mut sink = collector.clone();
        with_view(Level::Debug, b"one", |v| sink.write(v)).unwrap();
        with_view(Level::Debug, b"two", |v| sink.write(v)).unwrap();
        assert_eq!(collector.messages(), vec!["one", "two"]);
        assert!(collector.wait_for(2, Duration::from_millis(1)));
        assert!(!collector.wait_for(3, Duration::from_millis(1)));
        collector.clear();
        assert!(collector.is_empty());
    }
}
