//! The cooperative main loop.
//!
//! [`Context`] owns every piece of mutable state. Each call to
//! [`Context::pass`] checks its deadlines against the supplied clock and
//! does at most one unit of work, in priority order: a coordinator step, a
//! control line, the loop-reset countdown, an evolution frame, a health
//! report, a peripheral retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::entropy::EntropyCoupling;
use crate::life::{Bias, Board, DegeneracyDetector, EngineError, HashCheck, LifeEngine};
use crate::link::{
    Bus, ControlCommand, LinkParams, MAX_REPLY_LEN, PollOutcome, RoundEvent, StagingBuffer,
    TickCoordinator,
};
use crate::sample::{Ingest, RoundSampler};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A periodic deadline on the monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    next: Instant,
    period: Duration,
}

impl Deadline {
    /// First due one `period` after `now`.
    pub fn new(now: Instant, period: Duration) -> Self {
        Self {
            next: now + period,
            period,
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// If due, re-arm from `now` and return `true`.
    pub fn fire(&mut self, now: Instant) -> bool {
        if !self.due(now) {
            return false;
        }
        self.next = now + self.period;
        true
    }
}

/// Optional hardware with a fallible init. Only availability is tracked.
pub trait Peripheral: Send {
    fn name(&self) -> &str;

    /// Returns `true` once the device is usable.
    fn try_init(&mut self) -> bool;
}

struct PeripheralSlot {
    device: Box<dyn Peripheral>,
    available: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Status {
    Running,
    /// A loop was detected; the board is reseeded after `remaining`.
    Degenerate { remaining: Duration },
    /// No node answered the last round.
    Isolated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthReport {
    pub generation: u64,
    pub population: u64,
    pub tick: u32,
    pub rounds: u64,
    pub valid_nodes: usize,
    pub injected: u64,
    pub stamps: u64,
    pub loop_detected: bool,
}

/// What one pass did.
#[derive(Clone, Debug, PartialEq)]
pub enum Work {
    Round(RoundEvent),
    Control(ControlCommand),
    Frame {
        generation: u64,
        population: u64,
        check: HashCheck,
    },
    Reseeded {
        generation: u64,
    },
    Health(HealthReport),
    Retry {
        available: usize,
    },
    Idle,
}

/// Countdown from loop detection to reseed.
#[derive(Clone, Copy, Debug)]
struct LoopGuard {
    countdown: Duration,
    deadline: Option<Instant>,
    perturbed: bool,
}

impl LoopGuard {
    fn new(countdown: Duration) -> Self {
        Self {
            countdown,
            deadline: None,
            perturbed: false,
        }
    }

    /// Returns `true` when a perturbation has broken the loop and the
    /// detector latch should be released.
    fn after_observe(&mut self, check: &HashCheck, now: Instant) -> bool {
        if !check.loop_detected {
            self.cancel();
            return false;
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.countdown);
            self.perturbed = false;
            info!(countdown_ms = self.countdown.as_millis() as u64, "loop detected, reset pending");
            return false;
        }
        if self.perturbed && !check.revisited {
            self.cancel();
            return true;
        }
        false
    }

    fn note_perturbation(&mut self) {
        if self.deadline.is_some() {
            self.perturbed = true;
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn cancel(&mut self) {
        self.deadline = None;
        self.perturbed = false;
    }
}

pub struct Context {
    config: Config,
    engine: LifeEngine<u64>,
    detector: DegeneracyDetector,
    coordinator: TickCoordinator,
    params: LinkParams,
    coupling: EntropyCoupling,
    sampler: RoundSampler,
    guard: LoopGuard,
    frame: Deadline,
    health: Deadline,
    retry: Deadline,
    peripherals: Vec<PeripheralSlot>,
    control: Arc<StagingBuffer>,
    control_line: [u8; MAX_REPLY_LEN],
    started_at: Instant,
}

impl Context {
    /// Validate `config`, build every component and seed the board.
    pub fn new(config: Config, now: Instant) -> Result<Self, ContextError> {
        config.validate()?;
        let mut engine: LifeEngine<u64> =
            LifeEngine::with_config(config.board.columns, config.engine_config())?;
        engine.reseed(config.board.density);

        let mut coordinator = TickCoordinator::new(
            config.link.nodes,
            config.link.round_period(),
            config.link.node_spacing(),
            now,
        )
        .with_bits_per_node(config.link.bits_per_node);
        if let Some(anneal) = config.link.anneal {
            coordinator = coordinator.with_anneal(anneal);
        }

        info!(
            columns = engine.width(),
            rows = engine.height(),
            threads = engine.thread_count(),
            nodes = config.link.nodes,
            population = engine.population(),
            "context ready"
        );

        Ok(Self {
            detector: DegeneracyDetector::new(config.detector.history, config.detector.min_generations),
            coordinator,
            params: config.link.params(),
            coupling: EntropyCoupling::new(
                config.entropy.regions.clone(),
                config.entropy.epsilon,
                config.entropy.selector_shift,
                config.entropy.seed,
            ),
            sampler: RoundSampler::new(config.schedule.sample_history),
            guard: LoopGuard::new(config.detector.reset_countdown()),
            frame: Deadline::new(now, config.schedule.frame_period()),
            health: Deadline::new(now, config.schedule.health_period()),
            retry: Deadline::new(now, config.schedule.retry_period()),
            peripherals: Vec::new(),
            control: Arc::new(StagingBuffer::new()),
            control_line: [0; MAX_REPLY_LEN],
            started_at: now,
            engine,
            config,
        })
    }

    /// Register a peripheral and attempt its first init.
    pub fn add_peripheral(&mut self, mut device: Box<dyn Peripheral>) -> bool {
        let available = device.try_init();
        if available {
            info!(peripheral = device.name(), "peripheral ready");
        } else {
            warn!(peripheral = device.name(), "peripheral unavailable, will retry");
        }
        self.peripherals.push(PeripheralSlot { device, available });
        available
    }

    /// Producer handle for host control lines.
    pub fn control_handle(&self) -> Arc<StagingBuffer> {
        Arc::clone(&self.control)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &LifeEngine<u64> {
        &self.engine
    }

    pub fn board(&self) -> &Board<u64> {
        self.engine.board()
    }

    pub fn detector(&self) -> &DegeneracyDetector {
        &self.detector
    }

    pub fn coordinator(&self) -> &TickCoordinator {
        &self.coordinator
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    pub fn sampler(&self) -> &RoundSampler {
        &self.sampler
    }

    pub fn peripheral_available(&self, name: &str) -> Option<bool> {
        self.peripherals
            .iter()
            .find(|slot| slot.device.name() == name)
            .map(|slot| slot.available)
    }

    pub fn status(&self, now: Instant) -> Status {
        if let Some(deadline) = self.guard.deadline {
            return Status::Degenerate {
                remaining: deadline.saturating_duration_since(now),
            };
        }
        if self.coordinator.node_count() > 0
            && self.coordinator.rounds_completed() > 0
            && self.coordinator.valid_count() == 0
        {
            return Status::Isolated;
        }
        Status::Running
    }

    /// A host `@GET` collection has gathered every requested round.
    pub fn finished(&self) -> bool {
        self.sampler.finished()
    }

    /// The `@DONE` line owed to the host once a collection finishes.
    pub fn done_line(&self) -> Option<String> {
        self.sampler.done_line()
    }

    /// Do at most one unit of work.
    pub fn pass<B: Bus + ?Sized>(&mut self, now: Instant, bus: &mut B) -> Work {
        if let Some(event) = self.coordinator.poll(now, bus, &mut self.params) {
            self.on_round_event(&event);
            return Work::Round(event);
        }

        if let Some(len) = self.control.drain(&mut self.control_line) {
            let text = String::from_utf8_lossy(&self.control_line[..len]).into_owned();
            match text.parse::<ControlCommand>() {
                Ok(command) => {
                    self.apply_control(command, now);
                    return Work::Control(command);
                }
                Err(err) => warn!(line = %text, %err, "ignoring control line"),
            }
        }

        if self.guard.expired(now) {
            self.reseed("loop persisted");
            return Work::Reseeded {
                generation: self.engine.generation(),
            };
        }

        if self.frame.fire(now) {
            return self.evolve(now);
        }

        if self.health.fire(now) {
            let report = self.health_report();
            info!(
                generation = report.generation,
                population = report.population,
                tick = report.tick,
                rounds = report.rounds,
                valid_nodes = report.valid_nodes,
                injected = report.injected,
                stamps = report.stamps,
                loop_detected = report.loop_detected,
                uptime_s = now.saturating_duration_since(self.started_at).as_secs(),
                "health"
            );
            return Work::Health(report);
        }

        if self.retry.fire(now) {
            return Work::Retry {
                available: self.retry_peripherals(),
            };
        }

        Work::Idle
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            generation: self.engine.generation(),
            population: self.engine.population(),
            tick: self.coordinator.tick(),
            rounds: self.coordinator.rounds_completed(),
            valid_nodes: self.coordinator.valid_count(),
            injected: self.engine.injected(),
            stamps: self.coupling.fired(),
            loop_detected: self.detector.loop_detected(),
        }
    }

    fn evolve(&mut self, now: Instant) -> Work {
        let bias = self.bias();
        let population = self.engine.step(&bias);
        let generation = self.engine.generation();
        let check = self.detector.observe(self.engine.board(), generation, now);
        if self.guard.after_observe(&check, now) {
            self.detector.clear(generation);
            info!(generation, "perturbation broke the loop");
        }
        Work::Frame {
            generation,
            population,
            check,
        }
    }

    /// Regions of the nodes that answered the last round.
    fn bias(&self) -> Bias {
        let mut bias = Bias::new(self.params.injection(), self.config.entropy.max_bits_per_region)
            .with_epsilon(self.config.entropy.epsilon);
        let (width, height) = (self.engine.width(), self.engine.height());
        for (node, slot) in self.coordinator.slots().iter().enumerate() {
            if !slot.valid {
                continue;
            }
            if let Some(region) = self.coupling.regions().region(node, width, height) {
                bias = bias.with_region(region);
            }
        }
        bias
    }

    fn on_round_event(&mut self, event: &RoundEvent) {
        match event {
            RoundEvent::Started { tick } => debug!(tick, "round started"),
            RoundEvent::Broadcast { tick, noise } => debug!(tick, noise, "round broadcast"),
            RoundEvent::Polled {
                node,
                outcome: PollOutcome::Accepted(_),
            } => {
                let Some(slot) = self.coordinator.slot(*node) else {
                    return;
                };
                let (width, height) = (self.engine.width(), self.engine.height());
                if let Some(stamp) = self
                    .coupling
                    .couple(*node, slot, self.params.injection(), width, height)
                {
                    let born = self.engine.stamp(&stamp);
                    self.guard.note_perturbation();
                    debug!(node, pattern = ?stamp.pattern, born, "stamped");
                }
            }
            RoundEvent::Polled { .. } => {}
            RoundEvent::Completed(report) => {
                let kept = matches!(self.sampler.ingest(report), Ingest::Kept { .. });
                if kept && self.sampler.finished() {
                    if let Some(best) = self.sampler.best() {
                        info!(
                            kept = self.sampler.kept(),
                            cut = best.cut,
                            tick = best.tick,
                            bits = %best.bit_string(),
                            "collection finished"
                        );
                    }
                }
            }
        }
    }

    fn apply_control(&mut self, command: ControlCommand, now: Instant) {
        match command {
            ControlCommand::Hello => info!(
                nodes = self.coordinator.node_count(),
                tick = self.coordinator.tick(),
                "host hello"
            ),
            ControlCommand::Param(update) => {
                self.params.apply(&update);
                info!(
                    noise = self.params.noise,
                    mode = self.params.mode,
                    ambient_bias = self.params.ambient_bias,
                    "parameters updated"
                );
            }
            ControlCommand::Get(batch) => {
                self.sampler.collect(batch);
                info!(
                    rounds = batch.rounds,
                    stride = batch.stride,
                    burn = batch.burn,
                    "collecting rounds"
                );
            }
            ControlCommand::Reset => self.reseed("host reset"),
            ControlCommand::Round => {
                if !self.coordinator.start_round(now) {
                    debug!("round already in flight");
                }
            }
        }
    }

    fn reseed(&mut self, reason: &str) {
        self.engine.reseed(self.config.board.density);
        let generation = self.engine.generation();
        self.detector.reset(generation);
        self.guard.cancel();
        info!(generation, population = self.engine.population(), reason, "board reseeded");
    }

    fn retry_peripherals(&mut self) -> usize {
        for slot in self.peripherals.iter_mut().filter(|slot| !slot.available) {
            slot.available = slot.device.try_init();
            if slot.available {
                info!(peripheral = slot.device.name(), "peripheral recovered");
            }
        }
        self.peripherals.iter().filter(|slot| slot.available).count()
    }
}
