//! Utilities for running a top-level reactor graph from a binary, with
//! common options parsed from the command line.

use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use crate::runtime::{Config, ReactorGraph, Scheduler};

#[derive(clap::Parser, Debug)]
#[command(about = "Execute a Cadence reactor program")]
struct Args {
    /// Terminate after this much logical time, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Run as fast as possible, without wall-clock synchronization.
    #[arg(long, short)]
    fast_forward: bool,

    /// Keep waiting for physical actions when the event queue runs dry.
    #[arg(long)]
    keep_alive: bool,

    /// Worker thread count (defaults to the number of CPUs).
    #[arg(long, short)]
    workers: Option<usize>,

    /// Write a binary execution trace to this path.
    #[arg(long)]
    trace: Option<std::path::PathBuf>,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::default()
            .with_fast_forward(self.fast_forward)
            .with_keep_alive(self.keep_alive);
        if let Some(timeout_ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(trace) = self.trace {
            config = config.with_trace_path(trace);
        }
        config
    }
}

/// Build and run a graph with options parsed from the command line.
///
/// Returns the scheduler after a clean run so callers can inspect final
/// state; a clean run exits 0 through `main`, while fatal invariant
/// violations abort the process from inside the runtime.
pub fn build_and_run(name: &str, graph: ReactorGraph) -> anyhow::Result<Scheduler> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut scheduler = Scheduler::new(graph, args.into_config())
        .with_context(|| format!("error assembling reactor program {name:?}"))?;
    scheduler.run();
    tracing::info!(shutdown_tag = ?scheduler.shutdown_tag(), "program finished");
    Ok(scheduler)
}

/// Build and run a graph with an explicit config; used from tests.
pub fn build_and_test(name: &str, graph: ReactorGraph, config: Config) -> anyhow::Result<Scheduler> {
    let mut scheduler = Scheduler::new(graph, config)
        .with_context(|| format!("error assembling reactor program {name:?}"))?;
    scheduler.run();
    Ok(scheduler)
}
