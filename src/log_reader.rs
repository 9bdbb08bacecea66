//! Reader for streams of encoded records.
//!
//! [`BinaryWriterSink`](crate::sink::BinaryWriterSink) writes records back
//! to back in their slot encoding. This module walks such a byte stream and
//! decodes one record at a time, without copying.

use crate::record::{self, DecodeError, RecordView, HEADER_SIZE, LENGTH_OFFSET, MESSAGE_OFFSET};

/// Sequential reader over back-to-back encoded records.
///
/// Iteration yields `Err` once for the first malformed or incomplete record
/// and then stops; a log file cut short by a crash therefore ends with a
/// single [`DecodeError::Truncated`].
///
/// # Examples
///
/// ```
/// # use ring_logger::log_reader::RecordReader;
/// # use ring_logger::{Level, LogRecord};
/// let mut data = vec![0u8; 64];
/// let n = LogRecord::new(7, Level::Warn, 2, "low disk").encode_into(&mut data).unwrap();
/// data.truncate(n);
///
/// let mut reader = RecordReader::new(&data);
/// let record = reader.next().unwrap().unwrap();
/// assert_eq!(record.message(), b"low disk");
/// assert!(reader.next().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads the next record, or `None` at a clean end of stream.
    pub fn read_record(&mut self) -> Option<Result<RecordView<'a>, DecodeError>> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }

        let result = self.next_frame();
        match &result {
            Ok(view) => self.pos += view.as_bytes().len(),
            Err(_) => self.failed = true,
        }
        Some(result)
    }

    fn next_frame(&self) -> Result<RecordView<'a>, DecodeError> {
        let rest = &self.data[self.pos..];
        if rest.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: HEADER_SIZE,
                available: rest.len(),
            });
        }

        let mut len_bytes = [0u8; MESSAGE_OFFSET - LENGTH_OFFSET];
        len_bytes.copy_from_slice(&rest[LENGTH_OFFSET..MESSAGE_OFFSET]);
        let declared = i32::from_be_bytes(len_bytes);
        let len = usize::try_from(declared).map_err(|_| DecodeError::LengthMismatch {
            declared: declared as i64,
            available: rest.len() - HEADER_SIZE,
        })?;

        let total = HEADER_SIZE + len;
        if total > rest.len() {
            return Err(DecodeError::Truncated {
                needed: total,
                available: rest.len(),
            });
        }
        record::decode(&rest[..total])
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RecordView<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}
