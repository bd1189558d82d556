#[cfg(feature = "mimalloc-global")]
#[global_allocator]
static GLOBAL_ALLOCATOR: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use tick_life::link::{SimulatedBus, StagingBuffer};
use tick_life::{Config, Context, Work};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Back-off when a pass found nothing to do.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Run the board against a set of simulated nodes. Host control lines
/// (`@HELLO`, `@PARAM`, `@GET`, `@RESET`, `@ROUND`) are read from stdin.
#[derive(Debug, Parser)]
#[command(name = "tick-life", version)]
struct Args {
    /// JSON config file; defaults apply to anything it leaves out.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Board and engine seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Board width in 64-row columns.
    #[arg(long)]
    columns: Option<usize>,

    /// Simulated node count.
    #[arg(long)]
    nodes: Option<usize>,

    /// Column pool threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Stop after this many generations.
    #[arg(long, default_value_t = 2000)]
    frames: u64,

    /// Print the final board.
    #[arg(long)]
    ascii: bool,

    /// Write kept round samples here as `tick,score,bits` CSV.
    #[arg(long)]
    samples: Option<PathBuf>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(seed) = args.seed {
        config.board.seed = seed;
    }
    if let Some(columns) = args.columns {
        config.board.columns = columns;
    }
    if let Some(nodes) = args.nodes {
        config.link.nodes = nodes;
    }
    if let Some(threads) = args.threads {
        config.engine.threads = Some(threads);
    }
    config.validate()?;
    Ok(config)
}

/// Copy stdin lines into the staging slot, waiting while it is occupied.
fn spawn_control_reader(staging: Arc<StagingBuffer>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            while !staging.stage(line.as_bytes()) {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;

    let mut bus = SimulatedBus::new(config.link.behaviors(), config.board.seed.rotate_left(17));
    let mut ctx = Context::new(config, Instant::now())?;
    spawn_control_reader(ctx.control_handle());

    let started = Instant::now();
    loop {
        let now = Instant::now();
        match ctx.pass(now, &mut bus) {
            Work::Idle => thread::sleep(IDLE_BACKOFF),
            Work::Frame { generation, .. } if generation >= args.frames => break,
            _ => {}
        }
        if ctx.finished() {
            break;
        }
    }

    let report = ctx.health_report();
    info!(
        generation = report.generation,
        population = report.population,
        rounds = report.rounds,
        stamps = report.stamps,
        injected = report.injected,
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = ?ctx.status(Instant::now()),
        "finished"
    );
    if let Some(line) = ctx.done_line() {
        println!("{line}");
    }
    if let Some(best) = ctx.sampler().best() {
        println!("best cut {} at tick {}: {}", best.cut, best.tick, best.bit_string());
        info!(histogram = ?ctx.sampler().histogram(), "cut distribution");
    }
    if let Some(path) = &args.samples {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        ctx.sampler()
            .write_csv(BufWriter::new(file))
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), samples = ctx.sampler().samples().count(), "samples saved");
    }
    if args.ascii {
        println!("{:?}", ctx.board());
    }
    Ok(())
}
