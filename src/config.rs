//! Runtime configuration, loaded from JSON.
//!
//! Every section and field has a default, so a config file only needs the
//! values it changes:
//!
//! ```json
//! { "board": { "columns": 128 }, "link": { "nodes": 2, "round_period_ms": 100 } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::life::{EngineConfig, RegionMap};
use crate::link::{Anneal, LinkParams, NodeBehavior};

/// Upper bound on addressable nodes.
pub const MAX_NODES: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub board: BoardConfig,
    pub engine: EngineSection,
    pub link: LinkConfig,
    pub entropy: EntropyConfig,
    pub detector: DetectorConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Board width in 64-row columns.
    pub columns: usize,
    /// Live fraction for the initial fill and every reseed.
    pub density: f64,
    pub seed: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            columns: 64,
            density: 0.3,
            seed: 0x7E11_2024,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Column pool size; auto-sized when absent.
    pub threads: Option<usize>,
    pub max_threads: Option<usize>,
    pub parallel_min_columns: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub nodes: usize,
    pub round_period_ms: u64,
    /// Minimum gap between requests to consecutive nodes.
    pub node_spacing_ms: u64,
    pub noise: f32,
    pub mode: u8,
    /// Bits each node contributes to a round sample.
    pub bits_per_node: u32,
    pub anneal: Option<Anneal>,
    /// Simulated node behaviors, by index; missing entries answer compact.
    pub simulated: Vec<NodeBehavior>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            round_period_ms: 250,
            node_spacing_ms: 5,
            noise: 0.2,
            mode: 1,
            bits_per_node: 4,
            anneal: None,
            simulated: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn round_period(&self) -> Duration {
        Duration::from_millis(self.round_period_ms)
    }

    pub fn node_spacing(&self) -> Duration {
        Duration::from_millis(self.node_spacing_ms)
    }

    pub fn params(&self) -> LinkParams {
        LinkParams {
            noise: self.noise,
            mode: self.mode,
            ambient_bias: 0.0,
        }
    }

    /// One behavior per node.
    pub fn behaviors(&self) -> Vec<NodeBehavior> {
        (0..self.nodes)
            .map(|node| self.simulated.get(node).copied().unwrap_or_default())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Injection at or below this disables coupling.
    pub epsilon: f32,
    pub max_bits_per_region: u32,
    /// Bit offset of the two pattern selector bits in a node bitmask.
    pub selector_shift: u32,
    /// Node to quadrant assignment, repeated when shorter than the node list.
    pub regions: RegionMap,
    pub seed: u64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            max_bits_per_region: 4,
            selector_shift: 4,
            regions: RegionMap::default(),
            seed: 0xE7_0C0C,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub history: usize,
    /// Generations after a reset before a revisit counts as a loop.
    pub min_generations: u64,
    /// Time a detected loop has to clear before the board is reseeded.
    pub reset_countdown_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history: 64,
            min_generations: 32,
            reset_countdown_ms: 5_000,
        }
    }
}

impl DetectorConfig {
    pub fn reset_countdown(&self) -> Duration {
        Duration::from_millis(self.reset_countdown_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub frame_period_ms: u64,
    pub health_period_ms: u64,
    pub retry_period_ms: u64,
    /// Kept round samples retained for export; older ones are dropped.
    pub sample_history: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frame_period_ms: 50,
            health_period_ms: 5_000,
            retry_period_ms: 10_000,
            sample_history: 4_096,
        }
    }
}

impl ScheduleConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms)
    }

    pub fn health_period(&self) -> Duration {
        Duration::from_millis(self.health_period_ms)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }
}

impl Config {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board.columns < 2 {
            return Err(invalid("board.columns must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.board.density) {
            return Err(invalid("board.density must be within [0, 1]"));
        }
        if self.engine.threads == Some(0) || self.engine.max_threads == Some(0) {
            return Err(invalid("engine thread counts must be positive"));
        }
        if self.link.nodes > MAX_NODES {
            return Err(invalid(format!("link.nodes must be at most {MAX_NODES}")));
        }
        if self.link.round_period_ms == 0 {
            return Err(invalid("link.round_period_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&self.link.noise) {
            return Err(invalid("link.noise must be within [0, 1]"));
        }
        if !(1..=16).contains(&self.link.bits_per_node) {
            return Err(invalid("link.bits_per_node must be within 1..=16"));
        }
        if let Some(anneal) = &self.link.anneal {
            if !(0.0..=1.0).contains(&anneal.start) || !(0.0..=1.0).contains(&anneal.end) {
                return Err(invalid("link.anneal endpoints must be within [0, 1]"));
            }
        }
        if !(0.0..1.0).contains(&self.entropy.epsilon) {
            return Err(invalid("entropy.epsilon must be within [0, 1)"));
        }
        if self.entropy.selector_shift > 14 {
            return Err(invalid("entropy.selector_shift must be at most 14"));
        }
        if self.link.nodes > 0 && self.entropy.regions.is_empty() {
            return Err(invalid("entropy.regions must name at least one quadrant"));
        }
        if self.detector.history == 0 {
            return Err(invalid("detector.history must be positive"));
        }
        if self.schedule.frame_period_ms == 0 {
            return Err(invalid("schedule.frame_period_ms must be positive"));
        }
        if self.schedule.sample_history == 0 {
            return Err(invalid("schedule.sample_history must be positive"));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().seed(self.board.seed);
        if let Some(threads) = self.engine.threads {
            config = config.thread_count(threads);
        }
        if let Some(cap) = self.engine.max_threads {
            config = config.max_threads(cap);
        }
        if let Some(columns) = self.engine.parallel_min_columns {
            config = config.parallel_min_columns(columns);
        }
        config
    }
}
