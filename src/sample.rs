//! Per-round samples assembled from node bitmasks, scored as a cut on a
//! ring of spins.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};

use tracing::info;

use crate::link::NodeSlot;

/// The low `bits_per_node` bits of `mask`, least significant first.
pub fn bits_from_mask(mask: u16, bits_per_node: u32) -> impl Iterator<Item = bool> {
    (0..bits_per_node.min(16)).map(move |bit| (mask >> bit) & 1 == 1)
}

/// Edges `(i, i+1 mod n)` whose endpoints disagree.
pub fn ring_cut(bits: &[bool]) -> u32 {
    let n = bits.len();
    if n < 2 {
        return 0;
    }
    (0..n).filter(|&i| bits[i] != bits[(i + 1) % n]).count() as u32
}

/// What one completed round produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundReport {
    pub tick: u32,
    pub nodes: usize,
    pub valid_nodes: usize,
    /// Concatenated node bits; empty unless every node answered.
    pub bits: Vec<bool>,
    /// Ring cut of `bits`, for complete rounds only.
    pub cut: Option<u32>,
}

impl RoundReport {
    pub fn assemble(tick: u32, slots: &[NodeSlot], bits_per_node: u32) -> Self {
        let valid_nodes = slots.iter().filter(|slot| slot.valid).count();
        let complete = !slots.is_empty() && valid_nodes == slots.len();
        let bits: Vec<bool> = if complete {
            slots
                .iter()
                .flat_map(|slot| bits_from_mask(slot.bitmask, bits_per_node))
                .collect()
        } else {
            Vec::new()
        };
        let cut = complete.then(|| ring_cut(&bits));
        Self {
            tick,
            nodes: slots.len(),
            valid_nodes,
            bits,
            cut,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cut.is_some()
    }
}

/// One kept round: its tick, cut score and bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub tick: u32,
    pub cut: u32,
    pub bits: Vec<bool>,
}

impl Sample {
    pub fn bit_string(&self) -> String {
        self.bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }
}

/// A host collection request: skip `burn` complete rounds, then keep every
/// `stride`th one until `rounds` are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    pub rounds: u64,
    pub stride: u64,
    pub burn: u64,
}

impl Batch {
    pub fn new(rounds: u64) -> Self {
        Self {
            rounds,
            stride: 1,
            burn: 0,
        }
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn with_burn(mut self, burn: u64) -> Self {
        self.burn = burn;
        self
    }
}

/// What [`RoundSampler::ingest`] did with a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    /// Not every node answered.
    Incomplete,
    /// Complete, but inside the burn-in, between strides, or after the
    /// batch finished.
    Skipped,
    Kept { new_best: bool },
}

/// Keeps the samples of the current batch, the best cut among them and
/// the running best per kept sample.
#[derive(Clone, Debug)]
pub struct RoundSampler {
    batch: Option<Batch>,
    capacity: usize,
    samples: VecDeque<Sample>,
    best_history: VecDeque<(u32, u32)>,
    best: Option<Sample>,
    complete: u64,
    incomplete: u64,
    kept: u64,
}

impl Default for RoundSampler {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Samples retained when no capacity is given.
pub const DEFAULT_CAPACITY: usize = 4_096;

impl RoundSampler {
    /// Retain at most `capacity` kept samples; the oldest are dropped first.
    pub fn new(capacity: usize) -> Self {
        Self {
            batch: None,
            capacity: capacity.max(1),
            samples: VecDeque::new(),
            best_history: VecDeque::new(),
            best: None,
            complete: 0,
            incomplete: 0,
            kept: 0,
        }
    }

    /// Start a fresh collection and forget the previous one.
    pub fn collect(&mut self, batch: Batch) {
        self.batch = Some(Batch {
            stride: batch.stride.max(1),
            ..batch
        });
        self.samples.clear();
        self.best_history.clear();
        self.best = None;
        self.complete = 0;
        self.incomplete = 0;
        self.kept = 0;
    }

    pub fn ingest(&mut self, report: &RoundReport) -> Ingest {
        let Some(cut) = report.cut else {
            self.incomplete += 1;
            return Ingest::Incomplete;
        };
        let seen = self.complete;
        self.complete += 1;
        if self.finished() {
            return Ingest::Skipped;
        }
        let batch = self.batch.unwrap_or(Batch::new(u64::MAX));
        if seen < batch.burn || (seen - batch.burn) % batch.stride != 0 {
            return Ingest::Skipped;
        }

        let sample = Sample {
            tick: report.tick,
            cut,
            bits: report.bits.clone(),
        };
        let new_best = self.best.as_ref().is_none_or(|best| cut > best.cut);
        if new_best {
            info!(tick = report.tick, cut, "new best cut");
            self.best = Some(sample.clone());
        }
        self.kept += 1;
        push_bounded(&mut self.samples, sample, self.capacity);
        let best_cut = self.best.as_ref().map_or(cut, |best| best.cut);
        push_bounded(&mut self.best_history, (report.tick, best_cut), self.capacity);
        Ingest::Kept { new_best }
    }

    pub fn best(&self) -> Option<&Sample> {
        self.best.as_ref()
    }

    /// Retained kept samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// `(tick, best cut so far)` after each retained kept sample.
    pub fn best_history(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.best_history.iter().copied()
    }

    /// How many retained samples scored each cut.
    pub fn histogram(&self) -> BTreeMap<u32, u64> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.cut).or_insert(0) += 1;
        }
        counts
    }

    pub fn complete_rounds(&self) -> u64 {
        self.complete
    }

    pub fn incomplete_rounds(&self) -> u64 {
        self.incomplete
    }

    pub fn kept(&self) -> u64 {
        self.kept
    }

    pub fn batch(&self) -> Option<Batch> {
        self.batch
    }

    pub fn finished(&self) -> bool {
        self.batch.is_some_and(|batch| self.kept >= batch.rounds)
    }

    /// Completion line for the host once the batch is full.
    pub fn done_line(&self) -> Option<String> {
        if !self.finished() {
            return None;
        }
        let best = self.best.as_ref().map_or(0, |best| best.cut);
        Some(format!("@DONE K={} BEST={best}", self.kept))
    }

    /// Write the retained samples as `tick,score,bits` rows.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "tick,score,bits")?;
        for sample in &self.samples {
            writeln!(out, "{},{},{}", sample.tick, sample.cut, sample.bit_string())?;
        }
        out.flush()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if queue.len() == capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::{Batch, Ingest, RoundReport, RoundSampler, bits_from_mask, ring_cut};
    use crate::link::NodeSlot;

    fn slot(bitmask: u16, valid: bool) -> NodeSlot {
        NodeSlot {
            valid,
            bitmask,
            ..NodeSlot::default()
        }
    }

    #[test]
    fn mask_bits_are_lsb_first() {
        let bits: Vec<bool> = bits_from_mask(0b0110, 4).collect();
        assert_eq!(bits, vec![false, true, true, false]);
        assert_eq!(bits_from_mask(0xFFFF, 40).count(), 16);
    }

    #[test]
    fn ring_cut_counts_wrapping_edge() {
        assert_eq!(ring_cut(&[]), 0);
        assert_eq!(ring_cut(&[true]), 0);
        assert_eq!(ring_cut(&[true, false, true, false]), 4);
        assert_eq!(ring_cut(&[true, true, false, false]), 2);
        assert_eq!(ring_cut(&[true, false, false]), 2);
    }

    #[test]
    fn incomplete_round_has_no_score() {
        let report = RoundReport::assemble(3, &[slot(0b01, true), slot(0b10, false)], 2);
        assert_eq!(report.valid_nodes, 1);
        assert!(report.bits.is_empty());
        assert!(!report.is_complete());
        assert!(!RoundReport::assemble(1, &[], 4).is_complete());
    }

    #[test]
    fn sampler_keeps_highest_cut() {
        let mut sampler = RoundSampler::default();
        sampler.collect(Batch::new(2));
        let low = RoundReport::assemble(1, &[slot(0b00, true), slot(0b11, true)], 2);
        let high = RoundReport::assemble(2, &[slot(0b01, true), slot(0b01, true)], 2);
        assert_eq!(low.cut, Some(2));
        assert_eq!(high.cut, Some(4));

        assert_eq!(sampler.ingest(&high), Ingest::Kept { new_best: true });
        assert!(!sampler.finished());
        assert_eq!(sampler.done_line(), None);
        assert_eq!(sampler.ingest(&low), Ingest::Kept { new_best: false });
        assert!(sampler.finished());
        let best = sampler.best().expect("best");
        assert_eq!(best.tick, 2);
        assert_eq!(best.bit_string(), "1010");
        assert_eq!(sampler.done_line().as_deref(), Some("@DONE K=2 BEST=4"));
        assert_eq!(sampler.ingest(&high), Ingest::Skipped);
        assert_eq!(sampler.kept(), 2);
    }

    #[test]
    fn burn_in_and_stride_pick_rounds() {
        let mut sampler = RoundSampler::default();
        sampler.collect(Batch::new(3).with_burn(2).with_stride(3));
        let mut kept_ticks = Vec::new();
        for tick in 0..20 {
            let report = RoundReport::assemble(tick, &[slot(0b01, true), slot(0b10, true)], 2);
            if tick == 4 {
                let partial = RoundReport::assemble(tick, &[slot(0, true), slot(0, false)], 2);
                assert_eq!(sampler.ingest(&partial), Ingest::Incomplete);
            }
            if let Ingest::Kept { .. } = sampler.ingest(&report) {
                kept_ticks.push(tick);
            }
        }
        assert_eq!(kept_ticks, vec![2, 5, 8]);
        assert!(sampler.finished());
        assert_eq!(sampler.incomplete_rounds(), 1);
        assert_eq!(sampler.complete_rounds(), 20);
    }

    #[test]
    fn history_is_bounded_and_exported() {
        let mut sampler = RoundSampler::new(2);
        sampler.collect(Batch::new(10));
        for (tick, mask) in [(1, 0b00), (2, 0b01), (3, 0b11)] {
            sampler.ingest(&RoundReport::assemble(tick, &[slot(mask, true), slot(0b01, true)], 2));
        }
        let ticks: Vec<u32> = sampler.samples().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![2, 3]);
        assert_eq!(sampler.best_history().collect::<Vec<_>>(), vec![(2, 4), (3, 4)]);
        assert_eq!(sampler.histogram().into_iter().collect::<Vec<_>>(), vec![(2, 1), (4, 1)]);

        let mut out = Vec::new();
        sampler.write_csv(&mut out).expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "tick,score,bits\n2,4,1010\n3,2,1110\n"
        );
    }
}
