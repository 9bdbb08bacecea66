use std::io;

use thiserror::Error;

/// Errors surfaced by logger construction and shutdown.
///
/// The write path never returns these: producer-side failures are counted
/// and reported through `tracing` instead.
#[derive(Debug, Error)]
pub enum RingLogError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("consumer did not drain within the shutdown timeout ({pending} records pending)")]
    ShutdownTimeout { pending: u64 },

    #[error("logger already shut down")]
    AlreadyShutdown,
}

impl RingLogError {
    pub fn config(msg: impl Into<String>) -> Self {
        RingLogError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RingLogError>;
