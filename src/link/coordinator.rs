//! Round-based coordination of the remote nodes.
//!
//! A round walks `Idle → Broadcasting → Polling(0..n) → Done → Idle`, one
//! transition per [`TickCoordinator::poll`] call. Every wait is a deadline
//! compared against the caller's clock, so a pass never blocks.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::control::ParamUpdate;
use super::error::BusError;
use super::protocol::{self, Command, Decoded, MAX_REPLY_LEN, Observation, Rejection};
use super::slot::{LinkStats, NodeSlot};
use crate::sample::RoundReport;

/// Scale of the ambient bias term in the injection scalar.
const AMBIENT_SPAN: f32 = 0.1;

/// Transport to the nodes.
pub trait Bus {
    /// Cheap presence check before a request. `false` counts as absent.
    fn probe(&mut self, node: usize) -> bool;

    fn send(&mut self, node: usize, line: &str) -> Result<(), BusError>;

    /// Read whatever `node` has ready into `reply`. `Ok(None)` means no
    /// reply arrived.
    fn request(
        &mut self,
        node: usize,
        reply: &mut [u8; MAX_REPLY_LEN],
    ) -> Result<Option<usize>, BusError>;
}

/// Global parameters broadcast with every round.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkParams {
    /// Noise scalar in `[0, 1]`.
    pub noise: f32,
    pub mode: u8,
    /// Host-supplied offset in `[-1, 1]`.
    pub ambient_bias: f32,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            noise: 0.2,
            mode: 1,
            ambient_bias: 0.0,
        }
    }
}

impl LinkParams {
    /// The global injection scalar used for bias and coupling.
    pub fn injection(&self) -> f32 {
        (self.noise + self.ambient_bias * AMBIENT_SPAN).clamp(0.0, 1.0)
    }

    pub fn apply(&mut self, update: &ParamUpdate) {
        if let Some(noise) = update.noise {
            self.noise = noise.clamp(0.0, 1.0);
        }
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(bias) = update.ambient_bias {
            self.ambient_bias = bias.clamp(-1.0, 1.0);
        }
    }
}

/// Linear noise schedule over a number of rounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anneal {
    pub start: f32,
    pub end: f32,
    pub rounds: u64,
}

impl Anneal {
    /// Noise for the round with zero-based index `round`; holds `end` once
    /// the schedule has run out.
    pub fn noise_at(&self, round: u64) -> f32 {
        let noise = match self.rounds {
            0 => self.end,
            n if round + 1 >= n => self.end,
            n => {
                let progress = round as f32 / (n - 1) as f32;
                self.start + (self.end - self.start) * progress
            }
        };
        noise.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Broadcasting,
    Polling(usize),
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    Accepted(Observation),
    Rejected(Rejection),
    Absent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoundEvent {
    /// The round timer elapsed; `tick` goes out with the next broadcast.
    Started { tick: u32 },
    Broadcast { tick: u32, noise: f32 },
    Polled { node: usize, outcome: PollOutcome },
    Completed(RoundReport),
}

pub struct TickCoordinator {
    phase: RoundPhase,
    tick: u32,
    slots: Vec<NodeSlot>,
    stats: Vec<LinkStats>,
    period: Duration,
    spacing: Duration,
    next_round_at: Instant,
    next_request_at: Instant,
    rounds_started: u64,
    rounds_completed: u64,
    bits_per_node: u32,
    anneal: Option<Anneal>,
    reply: [u8; MAX_REPLY_LEN],
}

impl TickCoordinator {
    /// The first round is due one `period` after `now`.
    pub fn new(nodes: usize, period: Duration, spacing: Duration, now: Instant) -> Self {
        Self {
            phase: RoundPhase::Idle,
            tick: 0,
            slots: vec![NodeSlot::default(); nodes],
            stats: vec![LinkStats::default(); nodes],
            period,
            spacing,
            next_round_at: now + period,
            next_request_at: now,
            rounds_started: 0,
            rounds_completed: 0,
            bits_per_node: 4,
            anneal: None,
            reply: [0; MAX_REPLY_LEN],
        }
    }

    pub fn with_anneal(mut self, anneal: Anneal) -> Self {
        self.anneal = Some(anneal);
        self
    }

    pub fn with_bits_per_node(mut self, bits: u32) -> Self {
        self.bits_per_node = bits.clamp(1, 16);
        self
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        self.phase != RoundPhase::Idle
    }

    /// Tick of the current or most recent round; 0 before the first.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[NodeSlot] {
        &self.slots
    }

    pub fn slot(&self, node: usize) -> Option<&NodeSlot> {
        self.slots.get(node)
    }

    pub fn stats(&self) -> &[LinkStats] {
        &self.stats
    }

    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.valid).count()
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    /// Whether the round timer has elapsed.
    pub fn round_due(&self, now: Instant) -> bool {
        now >= self.next_round_at
    }

    /// Begin a round. Only possible from `Idle`; returns whether it started.
    pub fn start_round(&mut self, now: Instant) -> bool {
        if self.phase != RoundPhase::Idle {
            return false;
        }
        self.phase = RoundPhase::Broadcasting;
        self.next_round_at = now + self.period;
        true
    }

    /// Advance by at most one transition.
    pub fn poll<B: Bus + ?Sized>(
        &mut self,
        now: Instant,
        bus: &mut B,
        params: &mut LinkParams,
    ) -> Option<RoundEvent> {
        match self.phase {
            RoundPhase::Idle => {
                if !self.round_due(now) || !self.start_round(now) {
                    return None;
                }
                Some(RoundEvent::Started {
                    tick: self.tick.wrapping_add(1),
                })
            }
            RoundPhase::Broadcasting => Some(self.broadcast(now, bus, params)),
            RoundPhase::Polling(node) => {
                if now < self.next_request_at {
                    return None;
                }
                let outcome = self.poll_node(node, now, bus);
                self.next_request_at = now + self.spacing;
                self.phase = if node + 1 < self.slots.len() {
                    RoundPhase::Polling(node + 1)
                } else {
                    RoundPhase::Done
                };
                Some(RoundEvent::Polled { node, outcome })
            }
            RoundPhase::Done => {
                let report = RoundReport::assemble(self.tick, &self.slots, self.bits_per_node);
                self.rounds_completed += 1;
                self.phase = RoundPhase::Idle;
                debug!(
                    tick = self.tick,
                    valid = report.valid_nodes,
                    nodes = report.nodes,
                    "round complete"
                );
                Some(RoundEvent::Completed(report))
            }
        }
    }

    fn broadcast<B: Bus + ?Sized>(
        &mut self,
        now: Instant,
        bus: &mut B,
        params: &mut LinkParams,
    ) -> RoundEvent {
        self.tick = self.tick.wrapping_add(1);
        if let Some(anneal) = self.anneal {
            params.noise = anneal.noise_at(self.rounds_started);
        }
        self.rounds_started += 1;
        for slot in &mut self.slots {
            slot.begin_round();
        }

        let line = Command {
            tick: self.tick,
            mode: params.mode,
            noise: params.noise,
        }
        .encode();
        for node in 0..self.slots.len() {
            if let Err(err) = bus.send(node, &line) {
                self.stats[node].send_failures += 1;
                warn!(node, tick = self.tick, %err, "command send failed");
            }
        }

        self.next_request_at = now;
        self.phase = if self.slots.is_empty() {
            RoundPhase::Done
        } else {
            RoundPhase::Polling(0)
        };
        RoundEvent::Broadcast {
            tick: self.tick,
            noise: params.noise,
        }
    }

    fn poll_node<B: Bus + ?Sized>(&mut self, node: usize, now: Instant, bus: &mut B) -> PollOutcome {
        let outcome = self.request_reply(node, now, bus);
        let slot = &self.slots[node];
        if slot.came_online() {
            info!(node, tick = self.tick, "node online");
        } else if slot.went_offline() {
            info!(node, tick = self.tick, "node offline");
        }
        outcome
    }

    fn request_reply<B: Bus + ?Sized>(&mut self, node: usize, now: Instant, bus: &mut B) -> PollOutcome {
        let stats = &mut self.stats[node];
        if !bus.probe(node) {
            stats.absent += 1;
            return PollOutcome::Absent;
        }

        self.reply.fill(0);
        let len = match bus.request(node, &mut self.reply) {
            Ok(Some(len)) => len.min(MAX_REPLY_LEN),
            Ok(None) => {
                stats.absent += 1;
                return PollOutcome::Absent;
            }
            Err(err) => {
                stats.absent += 1;
                debug!(node, %err, "request failed");
                return PollOutcome::Absent;
            }
        };

        match protocol::parse(&self.reply[..len], self.tick) {
            Decoded::Compact(obs) | Decoded::Verbose(obs) => {
                stats.accepted += 1;
                self.slots[node].accept(&obs, now);
                PollOutcome::Accepted(obs)
            }
            Decoded::Rejected(rejection) => {
                match rejection {
                    Rejection::Stale { .. } => stats.stale += 1,
                    Rejection::Malformed { .. } => stats.malformed += 1,
                }
                debug!(node, tick = self.tick, %rejection, "reply rejected");
                PollOutcome::Rejected(rejection)
            }
        }
    }
}
