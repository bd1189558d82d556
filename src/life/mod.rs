//! Toroidal automaton: board storage, the bit-parallel engine, region bias,
//! seed patterns and loop detection.

mod board;
mod degeneracy;
mod engine;
mod kernel;
mod pattern;
mod region;

pub use board::{Board, ColumnWord};
pub use degeneracy::{DegeneracyDetector, HashCheck, HashHistory, board_hash};
pub use engine::{EngineConfig, EngineError, LifeEngine};
pub use kernel::next_column;
pub use pattern::{SPARSE_SIDE, SeedPattern, Stamp};
pub use region::{BIAS_EPSILON, Bias, Quadrant, Region, RegionMap};
