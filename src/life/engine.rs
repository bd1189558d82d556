use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::board::{Board, ColumnWord};
use super::kernel;
use super::pattern::Stamp;
use super::region::Bias;

/// Below this width the kernel always runs serially.
const PARALLEL_MIN_COLUMNS: usize = 256;
const DEFAULT_SEED: u64 = 0x5EED_1234_ABCD_EF01;

static PHYSICAL_CORES: OnceLock<usize> = OnceLock::new();

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build the engine thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[inline]
fn physical_core_count() -> usize {
    *PHYSICAL_CORES.get_or_init(|| num_cpus::get_physical().max(1))
}

/// Column stepping is memory bound; past eight cores use half of them.
#[inline]
fn auto_pool_thread_count_for_physical(physical: usize) -> usize {
    let physical = physical.max(1);
    if physical <= 8 {
        physical
    } else {
        physical.div_ceil(2).max(6)
    }
}

fn resolve_thread_count(config: &EngineConfig) -> usize {
    let mut threads = config
        .thread_count
        .unwrap_or_else(|| auto_pool_thread_count_for_physical(physical_core_count()));
    if let Some(cap) = config.max_threads {
        threads = threads.min(cap);
    }
    threads.max(1)
}

/// Configuration for a [`LifeEngine`].
///
/// `EngineConfig::default()` auto-sizes the pool; individual knobs are set
/// through the builder methods.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Threads for the column pool. `None` means physical cores, capped.
    pub thread_count: Option<usize>,
    /// Hard upper bound on threads regardless of auto-detection.
    pub max_threads: Option<usize>,
    /// Width at which stepping switches to the pool.
    pub parallel_min_columns: Option<usize>,
    /// Seed for reseeding and bias injection.
    pub seed: Option<u64>,
}

impl EngineConfig {
    pub fn thread_count(mut self, n: usize) -> Self {
        self.thread_count = Some(n.max(1));
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = Some(n.max(1));
        self
    }

    pub fn parallel_min_columns(mut self, columns: usize) -> Self {
        self.parallel_min_columns = Some(columns);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Sole writer of the board.
///
/// `advance` computes the next generation into a scratch buffer, applies
/// bias, then swaps; readers only ever see a complete generation.
pub struct LifeEngine<W: ColumnWord = u64> {
    board: Board<W>,
    next: Vec<W>,
    generation: u64,
    population: u64,
    injected: u64,
    pool: rayon::ThreadPool,
    threads: usize,
    parallel_min_columns: usize,
    rng: StdRng,
}

impl<W: ColumnWord> LifeEngine<W> {
    pub fn new(columns: usize) -> Result<Self, EngineError> {
        Self::with_config(columns, EngineConfig::default())
    }

    pub fn with_config(columns: usize, config: EngineConfig) -> Result<Self, EngineError> {
        Self::from_board(Board::new(columns), config)
    }

    pub fn from_board(board: Board<W>, config: EngineConfig) -> Result<Self, EngineError> {
        let threads = resolve_thread_count(&config);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("life-column-{i}"))
            .build()?;
        let population = board.population();
        Ok(Self {
            next: vec![W::ZERO; board.width()],
            board,
            generation: 0,
            population,
            injected: 0,
            pool,
            threads,
            parallel_min_columns: config.parallel_min_columns.unwrap_or(PARALLEL_MIN_COLUMNS),
            rng: StdRng::seed_from_u64(config.seed.unwrap_or(DEFAULT_SEED)),
        })
    }

    #[inline]
    pub fn board(&self) -> &Board<W> {
        &self.board
    }

    pub fn width(&self) -> usize {
        self.board.width()
    }

    pub fn height(&self) -> usize {
        Board::<W>::height()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn population(&self) -> u64 {
        self.population
    }

    /// Cells set by bias injection since construction.
    pub fn injected(&self) -> u64 {
        self.injected
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub fn get_cell(&self, x: i64, y: i64) -> bool {
        self.board.get(x, y)
    }

    pub fn set_cell(&mut self, x: i64, y: i64, alive: bool) {
        let was = self.board.get(x, y);
        if was == alive {
            return;
        }
        self.board.set(x, y, alive);
        if alive {
            self.population += 1;
        } else {
            self.population -= 1;
        }
    }

    pub fn set_cells_alive<I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        for (x, y) in cells {
            self.set_cell(x, y, true);
        }
    }

    /// Compute the next generation, apply `bias`, and return the new
    /// population. The generation counter is left to the caller.
    pub fn advance(&mut self, bias: &Bias) -> u64 {
        let width = self.board.width();
        if self.threads > 1 && width >= self.parallel_min_columns {
            let current = self.board.columns();
            let next = &mut self.next;
            self.pool.install(|| kernel::advance_parallel(current, next));
        } else {
            kernel::advance_serial(self.board.columns(), &mut self.next);
        }

        if bias.is_active() {
            self.injected += self.inject(bias) as u64;
        }

        self.board.swap_columns(&mut self.next);
        self.population = self.board.population();
        self.population
    }

    /// `advance` followed by a generation increment.
    pub fn step(&mut self, bias: &Bias) -> u64 {
        let population = self.advance(bias);
        self.generation += 1;
        population
    }

    pub fn step_n(&mut self, n: u64) {
        let none = Bias::none();
        for _ in 0..n {
            self.step(&none);
        }
    }

    /// Set up to `max_bits_per_region` random cells per region in the next
    /// buffer, each with probability `injection`. Never clears a cell.
    fn inject(&mut self, bias: &Bias) -> u32 {
        let width = self.next.len();
        let height = W::BITS as usize;
        let mut set = 0;
        for region in &bias.regions {
            for _ in 0..bias.max_bits_per_region {
                if self.rng.random::<f32>() >= bias.injection {
                    continue;
                }
                let x = (region.x + self.rng.random_range(0..region.width.max(1))) % width;
                let y = (region.y + self.rng.random_range(0..region.height.max(1))) % height;
                let mask = W::single(y);
                if self.next[x] & mask == W::ZERO {
                    self.next[x] |= mask;
                    set += 1;
                }
            }
        }
        set
    }

    /// Stamp a pattern; returns how many cells became live.
    pub fn stamp(&mut self, stamp: &Stamp) -> usize {
        let mut born = 0;
        for (x, y) in stamp.cells() {
            if !self.board.get(x, y) {
                self.board.set(x, y, true);
                born += 1;
            }
        }
        self.population += born as u64;
        born
    }

    /// Replace the board with random cells at `density`.
    pub fn reseed(&mut self, density: f64) {
        self.board.fill_random(&mut self.rng, density);
        self.population = self.board.population();
    }

    pub fn clear(&mut self) {
        self.board.clear();
        self.population = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, LifeEngine, auto_pool_thread_count_for_physical};
    use crate::life::pattern::{SeedPattern, Stamp};
    use crate::life::region::{Bias, Quadrant};

    fn engine(columns: usize) -> LifeEngine<u64> {
        LifeEngine::with_config(columns, EngineConfig::default().thread_count(1).seed(7))
            .expect("engine")
    }

    #[test]
    fn auto_pool_thread_count_targets_bandwidth_sweet_spot() {
        assert_eq!(auto_pool_thread_count_for_physical(0), 1);
        assert_eq!(auto_pool_thread_count_for_physical(4), 4);
        assert_eq!(auto_pool_thread_count_for_physical(8), 8);
        assert_eq!(auto_pool_thread_count_for_physical(12), 6);
        assert_eq!(auto_pool_thread_count_for_physical(32), 16);
    }

    #[test]
    fn advance_leaves_generation_to_caller() {
        let mut engine = engine(16);
        engine.set_cells_alive([(1, 1), (2, 1), (3, 1)]);
        assert_eq!(engine.advance(&Bias::none()), 3);
        assert_eq!(engine.generation(), 0);
        engine.step(&Bias::none());
        assert_eq!(engine.generation(), 1);
    }

    #[test]
    fn bias_only_adds_cells_inside_region() {
        let mut engine = engine(32);
        let region = Quadrant::Ne.region(32, 64);
        let bias = Bias::new(1.0, 6).with_region(region);
        let population = engine.step(&bias);
        assert!(population > 0 && population <= 6);
        engine.board().for_each_live(|x, y| assert!(region.contains(x, y), "({x},{y})"));
        assert_eq!(engine.injected(), population);
    }

    #[test]
    fn bias_is_skipped_below_epsilon() {
        let mut engine = engine(32);
        let bias = Bias::new(0.0, 64).with_region(Quadrant::Nw.region(32, 64));
        for _ in 0..20 {
            engine.step(&bias);
        }
        assert_eq!(engine.population(), 0);
        assert_eq!(engine.injected(), 0);
    }

    #[test]
    fn bias_respects_configured_epsilon() {
        let mut engine = engine(32);
        let region = Quadrant::Nw.region(32, 64);
        let bias = Bias::new(0.005, 64).with_region(region).with_epsilon(0.01);
        for _ in 0..20 {
            engine.step(&bias);
        }
        assert_eq!(engine.injected(), 0);
    }

    #[test]
    fn bias_never_removes_cells() {
        let mut engine = engine(16);
        let block = [(4, 4), (5, 4), (4, 5), (5, 5)];
        engine.set_cells_alive(block);
        let bias = Bias::new(1.0, 3).with_region(Quadrant::Se.region(16, 64));
        engine.step(&bias);
        for (x, y) in block {
            assert!(engine.get_cell(x, y));
        }
    }

    #[test]
    fn stamp_counts_only_new_cells() {
        let mut engine = engine(16);
        engine.set_cell(3, 3, true);
        let born = engine.stamp(&Stamp {
            pattern: SeedPattern::Block,
            origin: (3, 3),
            flip_x: false,
            flip_y: false,
            mask: 0,
        });
        assert_eq!(born, 3);
        assert_eq!(engine.population(), 4);
    }

    #[test]
    fn reseed_tracks_population() {
        let mut engine = engine(64);
        engine.reseed(0.5);
        assert_eq!(engine.population(), engine.board().population());
        assert!(engine.population() > 0);
        engine.clear();
        assert_eq!(engine.population(), 0);
    }
}
