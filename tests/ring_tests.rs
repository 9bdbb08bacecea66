use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use ring_logger::record::{decode, encode_into};
use ring_logger::ring::{RingBuffer, SlotRead};
use ring_logger::Level;

fn encode(seq: u64, msg: &str) -> Vec<u8> {
    let mut buf = vec![0u8; 128];
    let n = encode_into(&mut buf, seq, Level::Info, 0, msg.as_bytes()).unwrap();
    buf.truncate(n);
    buf
}

/// Drains like the consumer thread does: resync past dropped records, read,
/// commit.
fn drain(ring: &RingBuffer) -> Vec<String> {
    let mut out = Vec::new();
    let mut scratch = vec![0u8; ring.slot_capacity()];
    let published = ring.producer_cursor();
    let mut cursor = ring
        .consumer_cursor()
        .max(ring.oldest_retained(published));
    while cursor < published {
        if let SlotRead::Ready(n) = ring.read_into(cursor, &mut scratch) {
            out.push(decode(&scratch[..n]).unwrap().message_lossy().into_owned());
        }
        cursor += 1;
        ring.commit_consumed(cursor);
    }
    out
}

#[test]
fn test_fifo_single_producer() {
    let ring = RingBuffer::new(16, 64).unwrap();
    let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    for (i, msg) in expected.iter().enumerate() {
        assert_eq!(ring.publish(&encode(i as u64, msg)), i as u64);
    }
    assert_eq!(drain(&ring), expected);
    assert!(ring.is_empty());
}

#[test]
fn test_capacity_four_drops_first_of_five() {
    let ring = RingBuffer::new(4, 64).unwrap();
    for (i, msg) in ["A", "B", "C", "D", "E"].iter().enumerate() {
        ring.publish(&encode(i as u64, msg));
    }
    assert_eq!(drain(&ring), vec!["B", "C", "D", "E"]);
    assert_eq!(ring.dropped_overflow(), 1);
}

#[test]
fn test_overflow_keeps_last_capacity_records() {
    let capacity = 8;
    let extra = 13;
    let ring = RingBuffer::new(capacity, 64).unwrap();
    for i in 0..(capacity + extra) {
        ring.publish(&encode(i as u64, &i.to_string()));
    }

    let got = drain(&ring);
    let expected: Vec<String> = (extra..capacity + extra).map(|i| i.to_string()).collect();
    assert_eq!(got, expected);
    assert_eq!(ring.dropped_overflow(), extra as u64);
}

fn check_invariants_across_wraparound(publish: impl Fn(&RingBuffer, &[u8])) {
    let ring = RingBuffer::new(4, 64).unwrap();
    for round in 0..50u64 {
        publish(&ring, &encode(round, "x"));
        let producer = ring.producer_cursor();
        let consumer = ring.consumer_cursor();
        assert!(consumer <= producer);
        assert!(
            producer - consumer <= ring.capacity() as u64,
            "producer={producer} consumer={consumer}"
        );
        if round % 3 == 0 {
            drain(&ring);
        }
    }
}

#[test]
fn test_invariants_hold_across_wraparound() {
    check_invariants_across_wraparound(|ring, encoded| {
        ring.publish(encoded);
    });
}

#[test]
fn test_invariants_hold_across_wraparound_single_writer() {
    check_invariants_across_wraparound(|ring, encoded| {
        // SAFETY: the test thread is the only writer.
        unsafe { ring.publish_single(encoded) };
    });
}

#[test]
fn test_unconsumed_gap_stays_bounded() {
    let ring = RingBuffer::new(4, 64).unwrap();
    for i in 0..10 {
        ring.publish(&encode(i, "x"));
    }
    assert_eq!(ring.producer_cursor(), 10);
    assert_eq!(ring.producer_cursor() - ring.consumer_cursor(), 4);
    assert_eq!(ring.dropped_overflow(), 6);
}

#[test]
fn test_lapped_read_reports_overwritten() {
    let ring = RingBuffer::new(2, 64).unwrap();
    ring.publish(&encode(0, "first"));
    ring.publish(&encode(1, "second"));
    ring.publish(&encode(2, "third"));

    let mut scratch = vec![0u8; 64];
    assert_eq!(ring.read_into(0, &mut scratch), SlotRead::Overwritten);
    assert!(matches!(ring.read_into(2, &mut scratch), SlotRead::Ready(_)));
}

#[test]
fn test_concurrent_consumer_sees_ordered_sequences() {
    let ring = Arc::new(RingBuffer::new(64, 64).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let total = 20_000u64;

    let consumer = {
        let ring = ring.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut scratch = vec![0u8; ring.slot_capacity()];
            let mut cursor = 0u64;
            let mut last: Option<u64> = None;
            loop {
                let published = ring.producer_cursor();
                if cursor < published {
                    cursor = cursor
                        .max(ring.consumer_cursor())
                        .max(ring.oldest_retained(published));
                    if let SlotRead::Ready(n) = ring.read_into(cursor, &mut scratch) {
                        let view = decode(&scratch[..n]).unwrap();
                        let value: u64 = view.message_lossy().parse().unwrap();
                        // Timestamp field carries the sequence for this test.
                        assert_eq!(view.timestamp(), value);
                        if let Some(prev) = last {
                            assert!(value > prev, "{value} after {prev}");
                        }
                        last = Some(value);
                    }
                    cursor += 1;
                    ring.commit_consumed(cursor);
                } else if done.load(Ordering::Acquire) {
                    if cursor >= ring.producer_cursor() {
                        break;
                    }
                } else {
                    std::hint::spin_loop();
                }
            }
            last
        })
    };

    for i in 0..total {
        // SAFETY: the test thread is the only writer.
        unsafe { ring.publish_single(&encode(i, &i.to_string())) };
    }
    done.store(true, Ordering::Release);

    let last = consumer.join().unwrap();
    assert_eq!(last, Some(total - 1));
}

#[test]
fn test_claimed_mode_many_producers() {
    let ring = Arc::new(RingBuffer::new(4096, 64).unwrap());
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..500u64 {
                    ring.publish(&encode(t * 1000 + i, "p"));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ring.producer_cursor(), 2000);
    assert_eq!(ring.dropped_overflow(), 0);

    // Every producer's own records appear in its publish order.
    let mut scratch = vec![0u8; 64];
    let mut last_per_thread = [None::<u64>; 4];
    for seq in 0..2000 {
        let SlotRead::Ready(n) = ring.read_into(seq, &mut scratch) else {
            panic!("slot {seq} not readable");
        };
        let ts = decode(&scratch[..n]).unwrap().timestamp();
        let t = (ts / 1000) as usize;
        if let Some(prev) = last_per_thread[t] {
            assert!(ts > prev);
        }
        last_per_thread[t] = Some(ts);
    }
}
