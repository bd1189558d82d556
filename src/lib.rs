//! Toroidal Conway's Game of Life (B3/S23) on bit-packed columns, perturbed
//! by observations polled from a small set of remote nodes.

pub mod config;
pub mod entropy;
pub mod life;
pub mod link;
pub mod sample;
pub mod scheduler;

pub use config::{Config, ConfigError};
pub use life::{Board, EngineConfig, LifeEngine};
pub use scheduler::{Context, ContextError, Status, Work};
