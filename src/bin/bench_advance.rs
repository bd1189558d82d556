use std::env;
use std::time::Instant;

use anyhow::{Context as _, bail};
use tick_life::life::{Bias, EngineConfig, LifeEngine};

#[derive(Clone, Debug)]
struct BenchConfig {
    columns: usize,
    density: f64,
    warmup: u64,
    iters: u64,
    seed: u64,
    threads: Option<usize>,
    json: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            columns: 4096,
            density: 0.42,
            warmup: 3,
            iters: 200,
            seed: 0xA5A5_5EED_7788_1122,
            threads: None,
            json: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RunResult {
    threads: usize,
    total_ms: f64,
    avg_ms: f64,
    population: u64,
}

fn value<T: std::str::FromStr>(flag: &str, v: Option<String>) -> anyhow::Result<T> {
    let v = v.with_context(|| format!("{flag} requires a value"))?;
    v.parse()
        .map_err(|_| anyhow::anyhow!("{flag}: cannot parse {v:?}"))
}

fn parse_args() -> anyhow::Result<BenchConfig> {
    let mut cfg = BenchConfig::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--columns" => cfg.columns = value(&arg, args.next())?,
            "--density" => cfg.density = value(&arg, args.next())?,
            "--warmup" => cfg.warmup = value(&arg, args.next())?,
            "--iters" => cfg.iters = value::<u64>(&arg, args.next())?.max(1),
            "--seed" => {
                let v: String = value(&arg, args.next())?;
                cfg.seed = match v.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16).context("--seed hex parse failed")?,
                    None => v.parse().context("--seed expects u64")?,
                };
            }
            "--threads" => cfg.threads = Some(value(&arg, args.next())?),
            "--json" => cfg.json = true,
            other => bail!(
                "unknown arg: {other}\nusage: bench_advance [--columns N] [--density F] [--warmup N] [--iters N] [--seed N] [--threads N] [--json]"
            ),
        }
    }
    Ok(cfg)
}

fn run(cfg: &BenchConfig, threads: Option<usize>) -> anyhow::Result<RunResult> {
    let mut config = EngineConfig::default().seed(cfg.seed);
    if let Some(t) = threads {
        config = config.thread_count(t);
    }
    let mut engine = LifeEngine::<u64>::with_config(cfg.columns, config)?;
    engine.reseed(cfg.density);
    engine.step_n(cfg.warmup);

    let none = Bias::none();
    let start = Instant::now();
    for _ in 0..cfg.iters {
        engine.step(&none);
    }
    let total_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(RunResult {
        threads: engine.thread_count(),
        total_ms,
        avg_ms: total_ms / cfg.iters as f64,
        population: engine.population(),
    })
}

fn main() -> anyhow::Result<()> {
    let cfg = parse_args()?;
    let serial = run(&cfg, Some(1))?;
    let parallel = run(&cfg, cfg.threads)?;
    if serial.population != parallel.population {
        bail!(
            "serial and parallel runs diverged: {} vs {} live cells",
            serial.population,
            parallel.population
        );
    }

    if cfg.json {
        println!(
            "{{\"columns\":{},\"density\":{},\"warmup\":{},\"iters\":{},\"seed\":{},\"serial\":{{\"total_ms\":{:.6},\"avg_ms\":{:.6}}},\"parallel\":{{\"threads\":{},\"total_ms\":{:.6},\"avg_ms\":{:.6}}},\"population\":{},\"speedup\":{:.6}}}",
            cfg.columns,
            cfg.density,
            cfg.warmup,
            cfg.iters,
            cfg.seed,
            serial.total_ms,
            serial.avg_ms,
            parallel.threads,
            parallel.total_ms,
            parallel.avg_ms,
            parallel.population,
            serial.avg_ms / parallel.avg_ms,
        );
    } else {
        println!(
            "serial: total_ms={:.6}, avg_ms={:.6}, population={}",
            serial.total_ms, serial.avg_ms, serial.population
        );
        println!(
            "parallel({} threads): total_ms={:.6}, avg_ms={:.6}, speedup={:.3}x",
            parallel.threads,
            parallel.total_ms,
            parallel.avg_ms,
            serial.avg_ms / parallel.avg_ms,
        );
    }
    Ok(())
}
