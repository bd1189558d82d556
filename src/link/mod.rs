//! Link to the remote nodes: wire protocol, per-node state, the round
//! coordinator, host control lines and an in-process bus simulator.

mod control;
mod coordinator;
mod error;
mod protocol;
mod sim;
mod slot;
mod staging;

pub use control::{ControlCommand, ParamUpdate};
pub use coordinator::{
    Anneal, Bus, LinkParams, PollOutcome, RoundEvent, RoundPhase, TickCoordinator,
};
pub use error::{BusError, ControlError, ParseError};
pub use protocol::{
    COMMAND_TAG, Command, Decoded, MAX_REPLY_LEN, OBSERVATION_TAG, Observation, Rejection,
    WireFormat, frame, parse,
};
pub use sim::{NodeBehavior, SimulatedBus};
pub use slot::{LinkStats, NodeSlot};
pub use staging::StagingBuffer;
