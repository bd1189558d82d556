//! In-process node emulator.
//!
//! Each simulated node decodes the broadcast command and answers the next
//! request according to its [`NodeBehavior`]. Replies are deterministic for
//! a given seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::coordinator::Bus;
use super::error::BusError;
use super::protocol::{Command, MAX_REPLY_LEN};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeBehavior {
    #[default]
    Compact,
    Verbose,
    /// Answers with the previous round's tick.
    Stale,
    /// Answers with bytes that decode in neither format.
    Garbage,
    /// Passes the probe but never answers.
    Silent,
    /// Fails the probe.
    Absent,
}

#[derive(Clone, Debug, Default)]
struct SimNode {
    behavior: NodeBehavior,
    last: Option<Command>,
    /// Commands received out of tick sequence.
    loss: u16,
    received: u64,
}

pub struct SimulatedBus {
    nodes: Vec<SimNode>,
    rng: StdRng,
}

impl SimulatedBus {
    pub fn new(behaviors: impl IntoIterator<Item = NodeBehavior>, seed: u64) -> Self {
        Self {
            nodes: behaviors
                .into_iter()
                .map(|behavior| SimNode {
                    behavior,
                    ..SimNode::default()
                })
                .collect(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_behavior(&mut self, node: usize, behavior: NodeBehavior) {
        if let Some(sim) = self.nodes.get_mut(node) {
            sim.behavior = behavior;
        }
    }

    /// Commands `node` has received.
    pub fn received(&self, node: usize) -> u64 {
        self.nodes.get(node).map_or(0, |sim| sim.received)
    }

    pub fn last_command(&self, node: usize) -> Option<Command> {
        self.nodes.get(node).and_then(|sim| sim.last)
    }

    fn reply_line(&mut self, node: usize) -> Option<String> {
        let sim = &self.nodes[node];
        let command = sim.last?;
        let loss = sim.loss;
        let bitmask: u16 = self.rng.random();
        let noise = command.noise.clamp(0.0, 1.0);
        let line = match sim.behavior {
            NodeBehavior::Compact => compact(command.tick, bitmask, loss, noise),
            NodeBehavior::Stale => compact(command.tick.wrapping_sub(1), bitmask, loss, noise),
            NodeBehavior::Verbose => {
                let seed = self.rng.random_range(0..100_000u32);
                format!("O,{},{},{},{:.2},{}", command.tick, bitmask, loss % 100, noise, seed)
            }
            NodeBehavior::Garbage => format!("O,{:x}?,zz", self.rng.random::<u16>()),
            NodeBehavior::Silent | NodeBehavior::Absent => return None,
        };
        Some(line)
    }
}

fn compact(tick: u32, bitmask: u16, loss: u16, noise: f32) -> String {
    let noise = (noise * 255.0).round() as u8;
    format!("O,{tick:08X},{bitmask:04X},{loss:04X},{noise:02X}")
}

impl Bus for SimulatedBus {
    fn probe(&mut self, node: usize) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|sim| sim.behavior != NodeBehavior::Absent)
    }

    fn send(&mut self, node: usize, line: &str) -> Result<(), BusError> {
        let sim = self.nodes.get_mut(node).ok_or(BusError::NoSuchNode { node })?;
        if sim.behavior == NodeBehavior::Absent {
            return Ok(());
        }
        let command =
            Command::parse(line).ok_or_else(|| BusError::Write(format!("unparseable command {line:?}")))?;
        if sim
            .last
            .is_some_and(|last| command.tick != last.tick.wrapping_add(1))
        {
            sim.loss = sim.loss.wrapping_add(1);
        }
        sim.last = Some(command);
        sim.received += 1;
        Ok(())
    }

    fn request(
        &mut self,
        node: usize,
        reply: &mut [u8; MAX_REPLY_LEN],
    ) -> Result<Option<usize>, BusError> {
        if node >= self.nodes.len() {
            return Err(BusError::NoSuchNode { node });
        }
        let Some(line) = self.reply_line(node) else {
            return Ok(None);
        };
        let len = line.len().min(MAX_REPLY_LEN);
        reply[..len].copy_from_slice(&line.as_bytes()[..len]);
        Ok(Some(len))
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeBehavior, SimulatedBus};
    use crate::link::coordinator::Bus;
    use crate::link::protocol::{Command, Decoded, MAX_REPLY_LEN, Rejection, parse};

    fn exchange(behavior: NodeBehavior, tick: u32) -> Option<Decoded> {
        let mut bus = SimulatedBus::new([behavior], 3);
        let line = Command {
            tick,
            mode: 1,
            noise: 0.5,
        }
        .encode();
        bus.send(0, &line).expect("send");
        let mut reply = [0u8; MAX_REPLY_LEN];
        let len = bus.request(0, &mut reply).expect("request")?;
        Some(parse(&reply[..len], tick))
    }

    #[test]
    fn behaviors_produce_expected_decodes() {
        assert!(matches!(exchange(NodeBehavior::Compact, 9), Some(Decoded::Compact(_))));
        assert!(matches!(
            exchange(NodeBehavior::Verbose, u32::MAX),
            Some(Decoded::Verbose(_))
        ));
        assert!(matches!(
            exchange(NodeBehavior::Stale, 9),
            Some(Decoded::Rejected(Rejection::Stale { claimed: 8, .. }))
        ));
        assert!(matches!(
            exchange(NodeBehavior::Garbage, 9),
            Some(Decoded::Rejected(Rejection::Malformed { .. }))
        ));
        assert_eq!(exchange(NodeBehavior::Silent, 9), None);
    }

    #[test]
    fn no_reply_before_first_command() {
        let mut bus = SimulatedBus::new([NodeBehavior::Compact, NodeBehavior::Absent], 1);
        let mut reply = [0u8; MAX_REPLY_LEN];
        assert!(bus.probe(0));
        assert!(!bus.probe(1));
        assert!(!bus.probe(2));
        assert_eq!(bus.request(0, &mut reply).expect("request"), None);
        assert!(bus.request(5, &mut reply).is_err());
    }

    #[test]
    fn skipped_ticks_count_as_loss() {
        let mut bus = SimulatedBus::new([NodeBehavior::Compact], 1);
        for tick in [1, 2, 4] {
            let line = Command {
                tick,
                mode: 0,
                noise: 0.0,
            }
            .encode();
            bus.send(0, &line).expect("send");
        }
        assert_eq!(bus.received(0), 3);
        let mut reply = [0u8; MAX_REPLY_LEN];
        let len = bus.request(0, &mut reply).expect("request").expect("reply");
        let obs = parse(&reply[..len], 4).into_result().expect("accepted");
        assert_eq!(obs.loss, 1);
    }
}
