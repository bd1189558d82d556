//! Single-slot handoff between a byte producer (a reader thread or an
//! interrupt-style callback) and the scheduler.
//!
//! Producers only copy bytes and raise a flag. Parsing happens on the
//! consumer side. Producer and consumer handles may be shared freely: each
//! side claims the slot before touching it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::protocol::MAX_REPLY_LEN;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const DRAINING: u8 = 3;

pub struct StagingBuffer {
    bytes: UnsafeCell<[u8; MAX_REPLY_LEN]>,
    len: AtomicUsize,
    state: AtomicU8,
}

// SAFETY: `bytes` is only touched by the thread that moved `state` out of
// EMPTY (to WRITING) or out of READY (to DRAINING) with a compare-exchange,
// so at most one thread holds it at a time. Each holder hands it back with
// a release store that the next claimant's acquire pairs with.
unsafe impl Sync for StagingBuffer {}

impl Default for StagingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; MAX_REPLY_LEN]),
            len: AtomicUsize::new(0),
            state: AtomicU8::new(EMPTY),
        }
    }

    /// Producer side. Copies at most [`MAX_REPLY_LEN`] bytes; returns
    /// `false` and drops the line if the slot is not empty.
    pub fn stage(&self, line: &[u8]) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let len = line.len().min(MAX_REPLY_LEN);
        // SAFETY: this thread moved the slot to WRITING.
        unsafe {
            let bytes = &mut *self.bytes.get();
            bytes[..len].copy_from_slice(&line[..len]);
            bytes[len..].fill(0);
        }
        self.len.store(len, Ordering::Relaxed);
        self.state.store(READY, Ordering::Release);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Consumer side. Copies the pending line into `out` and frees the slot.
    pub fn drain(&self, out: &mut [u8; MAX_REPLY_LEN]) -> Option<usize> {
        self.state
            .compare_exchange(READY, DRAINING, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        let len = self.len.load(Ordering::Relaxed);
        // SAFETY: this thread moved the slot to DRAINING.
        unsafe {
            out.copy_from_slice(&*self.bytes.get());
        }
        self.state.store(EMPTY, Ordering::Release);
        Some(len)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::StagingBuffer;
    use crate::link::protocol::MAX_REPLY_LEN;

    #[test]
    fn second_line_is_dropped_until_drained() {
        let staging = StagingBuffer::new();
        assert!(staging.stage(b"@HELLO"));
        assert!(!staging.stage(b"@RESET"));

        let mut out = [0u8; MAX_REPLY_LEN];
        assert_eq!(staging.drain(&mut out), Some(6));
        assert_eq!(&out[..6], b"@HELLO");
        assert_eq!(staging.drain(&mut out), None);
        assert!(staging.stage(b"@RESET"));
    }

    #[test]
    fn long_lines_are_truncated_and_tail_zeroed() {
        let staging = StagingBuffer::new();
        staging.stage(&[b'x'; 40]);
        let mut out = [0u8; MAX_REPLY_LEN];
        assert_eq!(staging.drain(&mut out), Some(MAX_REPLY_LEN));

        staging.stage(b"ab");
        staging.drain(&mut out);
        assert_eq!(&out[..3], b"ab\0");
    }

    #[test]
    fn lines_cross_threads_intact() {
        let staging = Arc::new(StagingBuffer::new());
        let producer = {
            let staging = Arc::clone(&staging);
            thread::spawn(move || {
                for i in 0..200u32 {
                    let line = format!("@GET K={i}");
                    while !staging.stage(line.as_bytes()) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut out = [0u8; MAX_REPLY_LEN];
        let mut next = 0u32;
        while next < 200 {
            if let Some(len) = staging.drain(&mut out) {
                assert_eq!(&out[..len], format!("@GET K={next}").as_bytes());
                next += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().expect("producer");
    }

    #[test]
    fn competing_producers_never_tear_a_line() {
        const LINES: usize = 2_000;
        let staging = Arc::new(StagingBuffer::new());
        let producers: Vec<_> = [b'A', b'B']
            .into_iter()
            .map(|fill| {
                let staging = Arc::clone(&staging);
                thread::spawn(move || {
                    let line = [fill; MAX_REPLY_LEN];
                    let mut staged = 0;
                    while staged < LINES / 2 {
                        if staging.stage(&line) {
                            staged += 1;
                        } else {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut out = [0u8; MAX_REPLY_LEN];
        let mut seen = [0usize; 2];
        while seen[0] + seen[1] < LINES {
            match staging.drain(&mut out) {
                Some(len) => {
                    assert_eq!(len, MAX_REPLY_LEN);
                    let first = out[0];
                    assert!(out.iter().all(|&b| b == first), "torn line {out:?}");
                    seen[usize::from(first == b'B')] += 1;
                }
                None => thread::yield_now(),
            }
        }
        for producer in producers {
            producer.join().expect("producer");
        }
        assert_eq!(seen, [LINES / 2, LINES / 2]);
        assert!(!staging.is_pending());
    }
}
