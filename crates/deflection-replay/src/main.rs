//! Deflection Replay CLI
//!
//! Replays a packet scenario through one deflection arbiter per node.
//!
//! Usage:
//!   replay-deflection --scenario runs/two_compete/scenario.json \
//!                     --fstate-dir runs/two_compete/dynamic_state_100ms \
//!                     --config runs/two_compete/deflection.json \
//!                     --output runs/two_compete/decisions.json

use anyhow::Result;
use clap::Parser;
use deflection_replay::{loader, Replay};
use deflection_routing::DeflectionConfig;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "replay-deflection",
    about = "Replay deflection routing decisions over a recorded scenario"
)]
struct Args {
    /// Scenario JSON (nodes, ground station hops, queue samples, packets)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Directory holding fstate_<t_ns>.txt forwarding-state files
    #[arg(short, long)]
    fstate_dir: Option<PathBuf>,

    /// Deflection config JSON; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the RNG seed of the config
    #[arg(long)]
    seed: Option<u64>,

    /// Output JSON file
    #[arg(short, long, default_value = "deflection_decisions.json")]
    output: PathBuf,

    /// Log the forwarding state and flow cache of every node after the run
    #[arg(long)]
    dump: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("SX9-Orbital Deflection Replay");
    info!("{}", "=".repeat(60));

    let mut config = match &args.config {
        Some(path) => loader::load_config(path)?,
        None => DeflectionConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let scenario = loader::load_scenario(&args.scenario)?;
    let fstate = match &args.fstate_dir {
        Some(dir) => loader::load_fstate_dir(dir)?,
        None => Vec::new(),
    };

    let mut replay = Replay::new(scenario.num_nodes, &config)?;
    let report = replay.run(&scenario, &fstate)?;

    if args.dump {
        for node in report.stats.keys() {
            if let Some(arbiter) = replay.arbiter(*node) {
                info!("\n{}", arbiter.debug_dump_forwarding_state());
                info!("\n{}", arbiter.debug_dump_cache());
            }
        }
    }

    info!("\nWriting output to {:?}", args.output);
    let file = File::create(&args.output)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &report)?;

    // Summary
    info!("\n{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Packets decided: {}", report.outcomes.len());
    info!("Deflected: {}", report.deflected());
    for (node, stats) in &report.stats {
        info!("  node {}: {}", node, stats);
    }

    Ok(())
}
