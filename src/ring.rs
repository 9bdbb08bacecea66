//! Fixed-capacity slot ring shared by producers and the consumer thread.
//! Zero allocation after construction; cursors are cache-line padded.

use std::hint;
use std::ptr;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::thread;

use crate::error::{Result, RingLogError};
use crate::record::{self, DecodeError, HEADER_SIZE, LENGTH_OFFSET, MESSAGE_OFFSET};
use crate::sequence::PaddedSequence;

/// Spins before a producer starts yielding while it waits on a slower peer.
const PUBLISH_SPIN_LIMIT: u32 = 128;

/// Outcome of copying a slot out of the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRead {
    /// The record occupies `out[..len]`.
    Ready(usize),
    /// A producer lapped the reader and reused the slot, before or during
    /// the copy. The record is gone.
    Overwritten,
    /// The slot was stable but its header is not a valid record.
    Corrupt(DecodeError),
}

/// Power-of-two ring of fixed-size byte slots.
///
/// Sequence `s` lives in slot `s & (capacity - 1)`. A slot holding sequence
/// `s` may be read while `consumer <= s < producer`.
///
/// Publication never fails: when the ring is saturated the oldest unread
/// record is sacrificed. [`publish`](Self::publish) is safe from any number
/// of threads; [`publish_single`](Self::publish_single) skips the claim step
/// and is `unsafe` because it needs a single writer.
///
/// Each slot carries a write stamp: `2s + 1` while sequence `s` is being
/// written into it, `2s + 2` once the write is complete. The consumer
/// validates the stamp before and after copying a slot out, so a producer
/// that laps the consumer mid-read is detected instead of delivering a torn
/// record.
pub struct RingBuffer {
    producer: PaddedSequence,
    consumer: PaddedSequence,
    /// Next sequence handed out by [`publish`](Self::publish).
    claim: PaddedSequence,
    dropped_overflow: PaddedSequence,
    storage: *mut u8,
    storage_len: usize,
    stamps: Box<[AtomicU64]>,
    capacity: usize,
    mask: u64,
    slot_capacity: usize,
}

// Producers never write the same slot at once: `publish` orders writers of
// one slot through the producer cursor and `publish_single` requires a single
// writer. Readers only accept a copy the slot stamp vouches for.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Allocates `capacity` slots of `slot_capacity` bytes each, up front.
    pub fn new(capacity: usize, slot_capacity: usize) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RingLogError::config(format!(
                "ring capacity must be a power of two >= 2, got {capacity}"
            )));
        }
        if slot_capacity <= HEADER_SIZE || slot_capacity > i32::MAX as usize {
            return Err(RingLogError::config(format!(
                "slot capacity must be in {}..={}, got {slot_capacity}",
                HEADER_SIZE + 1,
                i32::MAX
            )));
        }
        let storage_len = capacity
            .checked_mul(slot_capacity)
            .ok_or_else(|| RingLogError::config("ring storage size overflows usize"))?;

        let storage = Box::into_raw(vec![0u8; storage_len].into_boxed_slice()) as *mut u8;
        let stamps = (0..capacity)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            producer: PaddedSequence::new(0),
            consumer: PaddedSequence::new(0),
            claim: PaddedSequence::new(0),
            dropped_overflow: PaddedSequence::new(0),
            storage,
            storage_len,
            stamps,
            capacity,
            mask: (capacity - 1) as u64,
            slot_capacity,
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Sequences below this value have been published.
    #[inline(always)]
    pub fn producer_cursor(&self) -> u64 {
        self.producer.get()
    }

    /// Next sequence the consumer will read.
    #[inline(always)]
    pub fn consumer_cursor(&self) -> u64 {
        self.consumer.get()
    }

    /// Records dropped by the drop-oldest policy so far.
    #[inline]
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.get()
    }

    /// Published records not yet consumed.
    pub fn len(&self) -> usize {
        self.producer_cursor()
            .saturating_sub(self.consumer_cursor()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest sequence that can still be in the ring given `published`.
    #[inline(always)]
    pub fn oldest_retained(&self, published: u64) -> u64 {
        published.saturating_sub(self.capacity as u64)
    }

    /// Publishes an encoded record and returns its sequence. Safe to call
    /// from any number of threads.
    ///
    /// Each call reserves a sequence with a fetch-add, writes its slot, then
    /// makes it visible once every earlier sequence is visible. A producer
    /// can therefore spin briefly on a slower peer, but never on the
    /// consumer. Records longer than a slot are truncated to the slot (the
    /// length field is patched to match). When `capacity` records are
    /// already unread the oldest is dropped to make room.
    pub fn publish(&self, encoded: &[u8]) -> u64 {
        let seq = self.claim.increment_and_get() - 1;
        let capacity = self.capacity as u64;

        if seq.saturating_sub(self.consumer.get()) >= capacity {
            // Several producers can see saturation at once; moving to an
            // absolute position keeps the gap bounded without double steps.
            self.consumer.advance_to(seq + 1 - capacity);
            self.dropped_overflow.increment_and_get();
        }

        // The previous writer of this slot (sequence `seq - capacity`) must
        // be done before the slot is reused.
        if seq >= capacity {
            self.wait_for_producer(seq - capacity + 1);
        }

        self.write_slot(seq, encoded);

        // Visibility is handed over in sequence order.
        self.wait_for_producer(seq);
        self.producer.set(seq + 1);
        seq
    }

    /// Publishes without the claim step: read the producer cursor, write the
    /// slot, bump the cursor.
    ///
    /// # Safety
    ///
    /// No other call to `publish` or `publish_single` on this ring may run
    /// at the same time. Two concurrent writers would copy into the same slot
    /// memory, which is a data race.
    pub unsafe fn publish_single(&self, encoded: &[u8]) -> u64 {
        let seq = self.producer.get();

        if seq.saturating_sub(self.consumer.get()) >= self.capacity as u64 {
            self.consumer.increment_and_get();
            self.dropped_overflow.increment_and_get();
        }

        self.write_slot(seq, encoded);
        self.claim.set(seq + 1);
        self.producer.increment_and_get();
        seq
    }

    /// Waits until the producer cursor has reached `target`.
    #[inline]
    fn wait_for_producer(&self, target: u64) {
        let mut spins = 0u32;
        while self.producer.get() < target {
            if spins < PUBLISH_SPIN_LIMIT {
                spins += 1;
                hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
    }

    fn write_slot(&self, seq: u64, encoded: &[u8]) {
        let index = (seq & self.mask) as usize;
        let len = encoded.len().min(self.slot_capacity);
        let stamp = &self.stamps[index];

        stamp.store(seq.wrapping_mul(2).wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: index < capacity, len <= slot_capacity, so the destination
        // range is inside `storage`. The odd stamp tells readers the slot is
        // being rewritten.
        unsafe {
            let dst = self.slot_ptr(index);
            ptr::copy_nonoverlapping(encoded.as_ptr(), dst, len);

            if encoded.len() > self.slot_capacity {
                let kept = self.slot_capacity - HEADER_SIZE;
                debug_assert!(kept <= i32::MAX as usize);
                let len_bytes = (kept as i32).to_be_bytes();
                ptr::copy_nonoverlapping(
                    len_bytes.as_ptr(),
                    dst.add(LENGTH_OFFSET),
                    MESSAGE_OFFSET - LENGTH_OFFSET,
                );
            }
        }

        stamp.store(seq.wrapping_mul(2).wrapping_add(2), Ordering::Release);
    }

    /// Copies the record for `seq` into `out`, which must be at least
    /// [`slot_capacity`](Self::slot_capacity) bytes.
    ///
    /// Call only for `seq < producer_cursor()`.
    pub fn read_into(&self, seq: u64, out: &mut [u8]) -> SlotRead {
        debug_assert!(out.len() >= self.slot_capacity);
        let index = (seq & self.mask) as usize;
        let expected = seq.wrapping_mul(2).wrapping_add(2);
        let stamp = &self.stamps[index];

        if stamp.load(Ordering::Acquire) != expected {
            return SlotRead::Overwritten;
        }

        let capacity = self.slot_capacity.min(out.len());
        // SAFETY: the slot spans slot_capacity bytes inside `storage`, and
        // both copies are bounded by `capacity`.
        let src = unsafe { self.slot_ptr(index) };
        unsafe { ptr::copy_nonoverlapping(src, out.as_mut_ptr(), HEADER_SIZE) };

        let total = match record::frame_len(&out[..HEADER_SIZE], capacity) {
            Ok(total) => total,
            Err(err) => {
                fence(Ordering::Acquire);
                if stamp.load(Ordering::Relaxed) != expected {
                    return SlotRead::Overwritten;
                }
                return SlotRead::Corrupt(err);
            }
        };

        unsafe {
            ptr::copy_nonoverlapping(
                src.add(HEADER_SIZE),
                out.as_mut_ptr().add(HEADER_SIZE),
                total - HEADER_SIZE,
            );
        }

        fence(Ordering::Acquire);
        if stamp.load(Ordering::Relaxed) != expected {
            return SlotRead::Overwritten;
        }
        SlotRead::Ready(total)
    }

    /// Records that everything below `next` has been consumed.
    ///
    /// The cursor only moves forward, so a commit never undoes a drop the
    /// producers made in the meantime.
    #[inline(always)]
    pub fn commit_consumed(&self, next: u64) {
        self.consumer.advance_to(next);
    }

    #[inline(always)]
    unsafe fn slot_ptr(&self, index: usize) -> *mut u8 {
        self.storage.add(index * self.slot_capacity)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        // SAFETY: `storage` came from `Box::into_raw` on a boxed slice of
        // exactly `storage_len` bytes and is freed once.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.storage,
                self.storage_len,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::record::{decode, encode_into};

    fn encoded(msg: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 256];
        let n = encode_into(&mut buf, 1, Level::Info, 3, msg.as_bytes()).unwrap();
        buf.truncate(n);
        buf
    }

    fn read(ring: &RingBuffer, seq: u64) -> Option<String> {
        let mut out = vec![0u8; ring.slot_capacity()];
        match ring.read_into(seq, &mut out) {
            SlotRead::Ready(n) => Some(decode(&out[..n]).unwrap().message_lossy().into_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(RingBuffer::new(0, 64).is_err());
        assert!(RingBuffer::new(1, 64).is_err());
        assert!(RingBuffer::new(12, 64).is_err());
        assert!(RingBuffer::new(8, HEADER_SIZE).is_err());
        assert!(RingBuffer::new(8, HEADER_SIZE + 1).is_ok());
    }

    #[test]
    fn test_publish_advances_producer() {
        let ring = RingBuffer::new(4, 64).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.publish(&encoded("a")), 0);
        assert_eq!(ring.publish(&encoded("b")), 1);
        assert_eq!(ring.producer_cursor(), 2);
        assert_eq!(ring.len(), 2);
        assert_eq!(read(&ring, 0).as_deref(), Some("a"));
        assert_eq!(read(&ring, 1).as_deref(), Some("b"));
    }

    #[test]
    fn test_drop_oldest_advances_consumer() {
        let ring = RingBuffer::new(4, 64).unwrap();
        for msg in ["A", "B", "C", "D", "E"] {
            // SAFETY: this thread is the only writer.
            unsafe { ring.publish_single(&encoded(msg)) };
        }
        assert_eq!(ring.consumer_cursor(), 1);
        assert_eq!(ring.dropped_overflow(), 1);
        assert_eq!(ring.len(), 4);
        // Slot 0 now holds E; sequence 0 is gone.
        assert_eq!(read(&ring, 0), None);
        assert_eq!(read(&ring, 4).as_deref(), Some("E"));
    }

    #[test]
    fn test_claimed_drop_oldest_bounds_gap() {
        let ring = RingBuffer::new(4, 64).unwrap();
        for i in 0..10 {
            ring.publish(&encoded(&i.to_string()));
        }
        assert_eq!(ring.producer_cursor(), 10);
        assert_eq!(ring.consumer_cursor(), 6);
        assert_eq!(ring.dropped_overflow(), 6);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_single_then_claimed_publish_continue_sequence() {
        let ring = RingBuffer::new(8, 64).unwrap();
        // SAFETY: this thread is the only writer.
        unsafe {
            ring.publish_single(&encoded("a"));
            ring.publish_single(&encoded("b"));
        }
        assert_eq!(ring.publish(&encoded("c")), 2);
        assert_eq!(read(&ring, 2).as_deref(), Some("c"));
    }

    #[test]
    fn test_commit_never_moves_consumer_back() {
        let ring = RingBuffer::new(4, 64).unwrap();
        for i in 0..6 {
            ring.publish(&encoded(&i.to_string()));
        }
        assert_eq!(ring.consumer_cursor(), 2);
        ring.commit_consumed(1);
        assert_eq!(ring.consumer_cursor(), 2);
        ring.commit_consumed(3);
        assert_eq!(ring.consumer_cursor(), 3);
    }

    #[test]
    fn test_oversized_record_truncated_to_slot() {
        let ring = RingBuffer::new(2, 32).unwrap();
        let long = "x".repeat(100);
        ring.publish(&encoded(&long));
        let msg = read(&ring, 0).unwrap();
        assert_eq!(msg.len(), 32 - HEADER_SIZE);
    }

    #[test]
    fn test_corrupt_slot_reported() {
        let ring = RingBuffer::new(2, 32).unwrap();
        let mut bad = encoded("abc");
        bad[LENGTH_OFFSET..MESSAGE_OFFSET].copy_from_slice(&1000i32.to_be_bytes());
        bad.truncate(20);
        // Slot is 32 bytes, so the declared length cannot fit.
        ring.publish(&bad);
        let mut out = vec![0u8; 32];
        assert!(matches!(
            ring.read_into(0, &mut out),
            SlotRead::Corrupt(DecodeError::LengthMismatch { declared: 1000, .. })
        ));
    }

    #[test]
    fn test_concurrent_publish_orders_visibility() {
        let ring = RingBuffer::new(1024, 64).unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        ring.publish(&encoded("m"));
                    }
                });
            }
        });
        assert_eq!(ring.producer_cursor(), 400);
        for seq in 0..400 {
            assert_eq!(read(&ring, seq).as_deref(), Some("m"));
        }
    }

    #[test]
    fn test_more_writers_than_slots() {
        // Writers lapping each other on a tiny ring must take turns per slot.
        let ring = RingBuffer::new(2, 64).unwrap();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..500 {
                        ring.publish(&encoded("m"));
                    }
                });
            }
        });
        assert_eq!(ring.producer_cursor(), 4000);
        assert!(ring.len() <= ring.capacity());
        assert_eq!(read(&ring, 3999).as_deref(), Some("m"));
        assert_eq!(read(&ring, 3998).as_deref(), Some("m"));
    }
}
