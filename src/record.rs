//! Binary record codec.
//!
//! Every slot in the ring holds exactly one record in this layout (all
//! integers big-endian):
//!
//! ```text
//! offset  size  field
//! 0       8     timestamp     (i64, monotonic nanoseconds)
//! 8       1     level         (u8, 1..=5)
//! 9       1     component_id  (u8)
//! 10      4     length        (i32, message byte count)
//! 14      N     message       (length bytes)
//! ```
//!
//! Slots are raw memory that gets recycled on every wraparound, so the
//! decoder never trusts `length`: it is checked against the bytes actually
//! available before anything is sliced.

use std::borrow::Cow;
use std::fmt;

use crate::level::Level;

pub const TIMESTAMP_SIZE: usize = 8;
pub const LEVEL_SIZE: usize = 1;
pub const COMPONENT_ID_SIZE: usize = 1;
pub const LENGTH_SIZE: usize = 4;

pub const TIMESTAMP_OFFSET: usize = 0;
pub const LEVEL_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;
pub const COMPONENT_ID_OFFSET: usize = LEVEL_OFFSET + LEVEL_SIZE;
pub const LENGTH_OFFSET: usize = COMPONENT_ID_OFFSET + COMPONENT_ID_SIZE;
pub const MESSAGE_OFFSET: usize = LENGTH_OFFSET + LENGTH_SIZE;

/// Bytes preceding the message in every record.
pub const HEADER_SIZE: usize = MESSAGE_OFFSET;

const _: () = assert!(HEADER_SIZE == 14);

/// Reasons a byte range cannot be read back as a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown level byte {0}")]
    UnknownLevel(u8),

    #[error("length field {declared} does not fit in {available} available bytes")]
    LengthMismatch { declared: i64, available: usize },
}

/// Largest message that fits in a buffer of `capacity` bytes.
#[inline(always)]
pub const fn max_message_len(capacity: usize) -> usize {
    capacity.saturating_sub(HEADER_SIZE)
}

/// Writes the header for a record whose message is `len` bytes.
///
/// `buf` must hold at least [`HEADER_SIZE`] bytes.
#[inline]
pub fn encode_header(buf: &mut [u8], timestamp: u64, level: Level, component_id: u8, len: usize) {
    buf[TIMESTAMP_OFFSET..LEVEL_OFFSET].copy_from_slice(&timestamp.to_be_bytes());
    buf[LEVEL_OFFSET] = level.as_u8();
    buf[COMPONENT_ID_OFFSET] = component_id;
    // `len` is always bounded by a validated slot capacity (<= i32::MAX).
    debug_assert!(len <= i32::MAX as usize);
    buf[LENGTH_OFFSET..MESSAGE_OFFSET].copy_from_slice(&(len as i32).to_be_bytes());
}

/// Encodes a full record into `buf`, truncating the message to whatever
/// space remains after the header.
///
/// Returns the number of bytes written, or `None` if `buf` cannot even hold
/// the header.
pub fn encode_into(
    buf: &mut [u8],
    timestamp: u64,
    level: Level,
    component_id: u8,
    message: &[u8],
) -> Option<usize> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let len = message
        .len()
        .min(max_message_len(buf.len()))
        .min(i32::MAX as usize);
    encode_header(buf, timestamp, level, component_id, len);
    buf[MESSAGE_OFFSET..MESSAGE_OFFSET + len].copy_from_slice(&message[..len]);
    Some(MESSAGE_OFFSET + len)
}

/// Reads the length field and returns the full encoded size of the record
/// starting at `bytes[0]`, checked against `capacity`.
pub fn frame_len(header: &[u8], capacity: usize) -> Result<usize, DecodeError> {
    if header.len() < HEADER_SIZE || capacity < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            needed: HEADER_SIZE,
            available: header.len().min(capacity),
        });
    }
    let mut len_bytes = [0u8; LENGTH_SIZE];
    len_bytes.copy_from_slice(&header[LENGTH_OFFSET..MESSAGE_OFFSET]);
    let declared = i32::from_be_bytes(len_bytes);
    let available = capacity - HEADER_SIZE;
    match usize::try_from(declared) {
        Ok(len) if len <= available => Ok(HEADER_SIZE + len),
        _ => Err(DecodeError::LengthMismatch {
            declared: declared as i64,
            available,
        }),
    }
}

/// Decodes the record at the start of `bytes` without copying.
///
/// Trailing bytes after the record are ignored, which is what a reused slot
/// looks like. A length field that would run past `bytes` is rejected.
pub fn decode(bytes: &[u8]) -> Result<RecordView<'_>, DecodeError> {
    let total = frame_len(bytes, bytes.len())?;

    let level_byte = bytes[LEVEL_OFFSET];
    let level = Level::from_u8(level_byte).ok_or(DecodeError::UnknownLevel(level_byte))?;

    let mut ts_bytes = [0u8; TIMESTAMP_SIZE];
    ts_bytes.copy_from_slice(&bytes[TIMESTAMP_OFFSET..LEVEL_OFFSET]);

    Ok(RecordView {
        timestamp: u64::from_be_bytes(ts_bytes),
        level,
        component_id: bytes[COMPONENT_ID_OFFSET],
        message: &bytes[MESSAGE_OFFSET..total],
        raw: &bytes[..total],
    })
}

/// A decoded record borrowing the buffer it was decoded from.
///
/// This is what a [`Sink`](crate::sink::Sink) receives. The borrow ends when
/// the sink call returns; use [`to_record`](Self::to_record) to keep a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    timestamp: u64,
    level: Level,
    component_id: u8,
    message: &'a [u8],
    raw: &'a [u8],
}

impl<'a> RecordView<'a> {
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub fn component_id(&self) -> u8 {
        self.component_id
    }

    #[inline]
    pub fn message(&self) -> &'a [u8] {
        self.message
    }

    /// Message as text, replacing invalid UTF-8. Borrows when the bytes are
    /// already valid.
    pub fn message_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.message)
    }

    /// The exact encoded bytes of this record (header plus message).
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    pub fn to_record(&self) -> LogRecord {
        LogRecord {
            timestamp: self.timestamp,
            level: self.level,
            component_id: self.component_id,
            message: self.message.to_vec(),
        }
    }
}

impl fmt::Display for RecordView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] [Component-{}] {}",
            self.timestamp,
            self.level,
            self.component_id,
            self.message_lossy()
        )
    }
}

/// An owned record, detached from ring memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogRecord {
    pub timestamp: u64,
    pub level: Level,
    pub component_id: u8,
    pub message: Vec<u8>,
}

impl LogRecord {
    pub fn new(timestamp: u64, level: Level, component_id: u8, message: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            level,
            component_id,
            message: message.into(),
        }
    }

    /// Size of this record once encoded without truncation.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.message.len()
    }

    /// See [`encode_into`].
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        encode_into(buf, self.timestamp, self.level, self.component_id, &self.message)
    }

    pub fn message_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}
