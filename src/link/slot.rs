use std::time::Instant;

use super::protocol::{Observation, WireFormat};

/// Last accepted report from one node.
///
/// Only an accepted reply writes the report fields. A rejected or missing
/// reply leaves them as they were and just keeps `valid` cleared for the
/// round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeSlot {
    /// Accepted a reply this round.
    pub valid: bool,
    /// `valid` as it stood at the end of the previous round.
    pub prev_valid: bool,
    pub format: Option<WireFormat>,
    pub noise: f32,
    /// Loss counter reported by the node itself.
    pub loss: u16,
    pub bitmask: u16,
    pub last_tick: u32,
    pub last_rx: Option<Instant>,
}

impl NodeSlot {
    pub(crate) fn begin_round(&mut self) {
        self.prev_valid = self.valid;
        self.valid = false;
    }

    pub(crate) fn accept(&mut self, obs: &Observation, now: Instant) {
        self.valid = true;
        self.format = Some(obs.format);
        self.noise = obs.noise;
        self.loss = obs.loss;
        self.bitmask = obs.bitmask;
        self.last_tick = obs.tick;
        self.last_rx = Some(now);
    }

    pub fn came_online(&self) -> bool {
        self.valid && !self.prev_valid
    }

    pub fn went_offline(&self) -> bool {
        !self.valid && self.prev_valid
    }
}

/// Coordinator-side counters for one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub accepted: u64,
    /// No reply: probe failed, nothing arrived, or the bus errored.
    pub absent: u64,
    pub malformed: u64,
    pub stale: u64,
    pub send_failures: u64,
}

impl LinkStats {
    /// Polls that did not produce an accepted reply.
    pub fn misses(&self) -> u64 {
        self.absent + self.malformed + self.stale
    }
}
