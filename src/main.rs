//! ClusterLock command line
//!
//! ```text
//! clusterlock [--config FILE] simulate --workers 8 --keys 4 --iterations 100
//! clusterlock [--config FILE] inspect-config --format yaml
//! ```
//!
//! `simulate` runs worker threads, each iteration in its own unit of work,
//! contending for a small key set, and checks that owners never overlap.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clusterlock::lock::{HELD_LOCKS_CACHE, LOCK_MAP_CACHE};
use clusterlock::{
    CacheScope, Error, LockManager, LockMetricsExporter, LockStats, ProviderConfig, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ClusterLock - named locks over scoped, bounded caches
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider configuration file (YAML)
    #[arg(long, env = "CLUSTERLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Node id used to attribute lock ownership (overrides the config file)
    #[arg(long, env = "CLUSTERLOCK_NODE_ID")]
    node_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run concurrent workers contending for a set of keys
    Simulate(SimulateArgs),

    /// Print the resolved provider configuration
    InspectConfig {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    /// Number of worker threads
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Number of distinct lock keys
    #[arg(long, default_value = "4")]
    keys: usize,

    /// Units of work per worker
    #[arg(long, default_value = "100")]
    iterations: usize,

    /// Time an owner holds its lock, in microseconds
    #[arg(long, default_value = "50")]
    hold_micros: u64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Also print Prometheus metrics
    #[arg(long)]
    metrics: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Yaml,
    Json,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    match &args.command {
        Command::Simulate(sim) => simulate(config, sim),
        Command::InspectConfig { format } => inspect_config(&config, *format),
    }
}

fn load_config(args: &Args) -> Result<ProviderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            ProviderConfig::from_file(path)?
        }
        None => ProviderConfig::default(),
    };
    if let Some(node) = &args.node_id {
        config = config.with_node_id(node.clone());
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Simulate
// =============================================================================

#[derive(Debug, Serialize)]
struct Summary {
    node: String,
    workers: usize,
    keys: usize,
    iterations: usize,
    owned: u64,
    contended: u64,
    violations: u64,
    elapsed_ms: u128,
    locks: LockStats,
}

struct Simulation<'a> {
    manager: &'a LockManager,
    keys: usize,
    iterations: usize,
    hold: Duration,
    occupancy: Vec<AtomicUsize>,
    owned: AtomicU64,
    contended: AtomicU64,
    violations: AtomicU64,
}

impl Simulation<'_> {
    fn run_worker(&self, worker: usize) -> Result<()> {
        for iteration in 0..self.iterations {
            let slot = (worker + iteration) % self.keys;
            self.manager.with_unit_of_work(|| self.contend(slot))?;
        }
        Ok(())
    }

    fn contend(&self, slot: usize) -> Result<()> {
        let key = format!("key-{slot}");
        let lock = self.manager.acquire(&key)?;
        if !lock.is_owner() {
            self.contended.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.owned.fetch_add(1, Ordering::Relaxed);
        if self.occupancy[slot].fetch_add(1, Ordering::AcqRel) != 0 {
            self.violations.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "Two owners inside one critical section");
        }
        if !self.hold.is_zero() {
            thread::sleep(self.hold);
        }
        self.occupancy[slot].fetch_sub(1, Ordering::AcqRel);

        // Every other owner leaves release to the end-of-work sweep
        if slot % 2 == 0 {
            self.manager.release(&lock);
        }
        Ok(())
    }
}

fn simulate(config: ProviderConfig, args: &SimulateArgs) -> Result<()> {
    if args.workers == 0 || args.keys == 0 {
        return Err(Error::Config("workers and keys must both be positive".to_string()));
    }

    let manager = LockManager::from_config(config)?;
    info!(
        node = %manager.node_id(),
        workers = args.workers,
        keys = args.keys,
        iterations = args.iterations,
        "Starting simulation"
    );

    let sim = Simulation {
        manager: &manager,
        keys: args.keys,
        iterations: args.iterations,
        hold: Duration::from_micros(args.hold_micros),
        occupancy: (0..args.keys).map(|_| AtomicUsize::new(0)).collect(),
        owned: AtomicU64::new(0),
        contended: AtomicU64::new(0),
        violations: AtomicU64::new(0),
    };

    let started = Instant::now();
    let results = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = (0..args.workers)
            .map(|worker| {
                let sim = &sim;
                s.spawn(move |_| sim.run_worker(worker))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::Internal("worker panicked".to_string())))
            })
            .collect::<Result<Vec<()>>>()
    })
    .map_err(|_| Error::Internal("simulation aborted".to_string()))?;
    results?;

    let summary = Summary {
        node: manager.node_id().to_string(),
        workers: args.workers,
        keys: args.keys,
        iterations: args.iterations,
        owned: sim.owned.load(Ordering::Relaxed),
        contended: sim.contended.load(Ordering::Relaxed),
        violations: sim.violations.load(Ordering::Relaxed),
        elapsed_ms: started.elapsed().as_millis(),
        locks: manager.stats(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if args.metrics {
        let exporter = LockMetricsExporter::new()?;
        exporter.observe(&manager);
        print!("{}", exporter.render()?);
    }

    if summary.violations > 0 {
        return Err(Error::Internal(format!(
            "mutual exclusion violated {} times",
            summary.violations
        )));
    }
    if summary.locks.cluster_locks > 0 {
        return Err(Error::Internal(format!(
            "{} locks left behind after all units of work ended",
            summary.locks.cluster_locks
        )));
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("node:        {}", summary.node);
    println!(
        "workload:    {} workers x {} iterations over {} keys",
        summary.workers, summary.iterations, summary.keys
    );
    println!("owned:       {}", summary.owned);
    println!("contended:   {}", summary.contended);
    println!("violations:  {}", summary.violations);
    println!("released:    {}", summary.locks.released);
    println!("sweeps:      {}", summary.locks.sweeps);
    println!("elapsed:     {} ms", summary.elapsed_ms);
}

// =============================================================================
// Inspect Config
// =============================================================================

#[derive(Debug, Serialize)]
struct ResolvedConfig<'a> {
    config: &'a ProviderConfig,
    lockmap_capacity: usize,
    heldlocks_capacity: usize,
}

fn inspect_config(config: &ProviderConfig, format: Format) -> Result<()> {
    let resolved = ResolvedConfig {
        config,
        lockmap_capacity: config.capacity_for(LOCK_MAP_CACHE, CacheScope::ClusterReplicated),
        heldlocks_capacity: config.capacity_for(HELD_LOCKS_CACHE, CacheScope::Request),
    };
    let rendered = match format {
        Format::Yaml => serde_yaml::to_string(&resolved)?,
        Format::Json => serde_json::to_string_pretty(&resolved)?,
    };
    println!("{rendered}");
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
