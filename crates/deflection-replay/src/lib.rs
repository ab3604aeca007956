//! Deflection Replay
//!
//! Drives one [`DeflectionArbiter`](deflection_routing::DeflectionArbiter) per
//! simulated node over a recorded scenario, without a network simulator.
//!
//! # Inputs
//!
//! | Input | Format | Loader |
//! |-------|--------|--------|
//! | Forwarding state | `fstate_<t_ns>.txt`, `current,dest,next,own_if,next_if[,...]` | [`loader::load_fstate_dir`] |
//! | Engine config | JSON [`DeflectionConfig`](deflection_routing::DeflectionConfig) | [`loader::load_config`] |
//! | Scenario | JSON [`Scenario`] (queues, ground station hops, packets) | [`loader::load_scenario`] |
//!
//! Events are applied in time order; at equal timestamps forwarding and queue
//! updates land before packets.

use deflection_routing::{DeflectionError, NodeId};
use thiserror::Error;

pub mod loader;
pub mod scenario;

pub use loader::FstateEntry;
pub use scenario::{PacketOutcome, Replay, ReplayReport, Scenario, ScenarioPacket};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("Engine error: {0}")]
    Engine(#[from] DeflectionError),
    #[error("Node {0} outside of scenario (size {1})")]
    UnknownNode(NodeId, usize),
}

pub type Result<T> = std::result::Result<T, ReplayError>;
