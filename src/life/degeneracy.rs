//! Loop detection over a rolling history of whole-board hashes.

use std::time::Instant;

use tracing::info;

use super::board::{Board, ColumnWord, HASH_PRIME};

const HASH_OFFSET: u32 = 0x811C_9DC5;

/// Order-sensitive 32-bit hash of every bit of the board.
///
/// Columns are folded in index order, each word low half first, with a
/// multiply-xor step per 32-bit half. The width is mixed in last so boards
/// of different shapes never compare equal by accident.
pub fn board_hash<W: ColumnWord>(board: &Board<W>) -> u32 {
    let mut hash = HASH_OFFSET;
    for &column in board.columns() {
        hash = column.fold_hash(hash);
    }
    (hash ^ board.width() as u32).wrapping_mul(HASH_PRIME)
}

/// Fixed-capacity ring of recent hashes. Membership only.
#[derive(Clone, Debug)]
pub struct HashHistory {
    ring: Vec<u32>,
    capacity: usize,
    head: usize,
}

impl HashHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, hash: u32) -> bool {
        self.ring.contains(&hash)
    }

    /// Append, overwriting the oldest entry once full.
    pub fn push(&mut self, hash: u32) {
        if self.ring.len() < self.capacity {
            self.ring.push(hash);
        } else {
            self.ring[self.head] = hash;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.head = 0;
    }
}

/// Result of observing one generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashCheck {
    pub hash: u32,
    /// This hash was already in the history.
    pub revisited: bool,
    /// Latched loop flag after this observation.
    pub loop_detected: bool,
}

#[derive(Clone, Debug)]
pub struct DegeneracyDetector {
    history: HashHistory,
    min_generations: u64,
    reset_generation: u64,
    loop_detected: bool,
    detected_at: Option<Instant>,
}

impl DegeneracyDetector {
    pub fn new(capacity: usize, min_generations: u64) -> Self {
        Self {
            history: HashHistory::with_capacity(capacity),
            min_generations,
            reset_generation: 0,
            loop_detected: false,
            detected_at: None,
        }
    }

    /// Hash `board`, test it against the history, then record it.
    ///
    /// A revisit only latches the loop flag once `min_generations` have
    /// passed since the last reset, so short transients at startup are
    /// ignored.
    pub fn observe<W: ColumnWord>(
        &mut self,
        board: &Board<W>,
        generation: u64,
        now: Instant,
    ) -> HashCheck {
        let hash = board_hash(board);
        let revisited = self.history.contains(hash);
        let settled = generation.saturating_sub(self.reset_generation) >= self.min_generations;
        if revisited && settled && !self.loop_detected {
            self.loop_detected = true;
            self.detected_at = Some(now);
            info!(generation, hash, "board revisited a prior configuration");
        }
        self.history.push(hash);
        HashCheck {
            hash,
            revisited,
            loop_detected: self.loop_detected,
        }
    }

    pub fn loop_detected(&self) -> bool {
        self.loop_detected
    }

    pub fn detected_at(&self) -> Option<Instant> {
        self.detected_at
    }

    pub fn history(&self) -> &HashHistory {
        &self.history
    }

    /// Release the latch but keep the history.
    pub fn clear(&mut self, generation: u64) {
        self.loop_detected = false;
        self.detected_at = None;
        self.reset_generation = generation;
    }

    /// Release the latch and forget every recorded hash.
    pub fn reset(&mut self, generation: u64) {
        self.clear(generation);
        self.history.clear();
    }
}
