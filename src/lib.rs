//! # Ring Logger
//!
//! A minimal-overhead log transport for latency-sensitive code:
//!
//! * **Non-blocking producers**: a write encodes into a thread-local buffer
//!   and copies it into a pre-allocated ring slot; it never waits and never
//!   fails
//! * **Zero allocation**: slots and per-thread scratch buffers are allocated
//!   once and reused
//! * **One consumer thread**: drains records in order and hands them to a
//!   pluggable [`Sink`]
//! * **Drop-oldest overflow**: when the ring is full the oldest unread record
//!   is sacrificed instead of blocking the caller
//!
//! ## Main Components
//!
//! * `RingLogger`: owned handle with the producer API and shutdown
//! * `ring`: the slot ring and its publish protocol
//! * `sequence`: cache-line padded cursors
//! * `record`: the fixed binary record layout
//! * `sink`: the sink contract and stock sinks
//!
//! ## Quick Start
//!
//! ```
//! use ring_logger::{ring_log, ConsoleSink, Level, RingLogger, RingLoggerConfig};
//!
//! let config = RingLoggerConfig::new(1024).unwrap().with_min_level(Level::Debug);
//! let logger = RingLogger::new(config, ConsoleSink).unwrap();
//!
//! logger.write_str(Level::Info, 1, "Hello, world!");
//! logger.write_bytes(Level::Warn, 2, b"raw bytes");
//! ring_log!(logger, Level::Debug, 3, "Temperature: {} C", 25.5);
//!
//! logger.shutdown().unwrap();
//! ```

pub mod config;
mod consumer;
pub mod diagnostics;
pub mod efficient_clock;
pub mod error;
pub mod level;
pub mod log_reader;
pub mod logger;
pub mod record;
pub mod ring;
pub mod sequence;
pub mod sink;
pub mod stats;

pub use config::{ConsumerPriority, ProducerMode, RingLoggerConfig};
pub use error::{Result, RingLogError};
pub use level::Level;
pub use log_reader::RecordReader;
pub use logger::RingLogger;
pub use record::{DecodeError, LogRecord, RecordView};
pub use ring::RingBuffer;
pub use sequence::PaddedSequence;
pub use sink::{BinaryWriterSink, CollectingSink, ConsoleSink, LogFacadeSink, Sink};
pub use stats::LoggerStats;
