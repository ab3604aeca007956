//! Deflection Routing Library
//!
//! Congestion-aware deflection arbiter for satellites that hand traffic down
//! to a ground station. When the default ground station link queue fills up,
//! the arbiter may push a packet onto an alternate neighbor instead.
//!
//! # Decision Pipeline
//!
//! ```text
//! decide() ─► forwarding table ─► final hop to GS? ─► weights refresh/decay
//!                                                    │
//!                   flow cache ◄─────────────────────┘
//!                       │ miss / stale
//!                       ▼
//!        checkpoints ─► chance ─► draw ─► loop filter ─► weighted neighbor
//! ```
//!
//! | Stage | Module | Role |
//! |-------|--------|------|
//! | Checkpoints | [`checkpoint`] | Gate: is deflection considered at all |
//! | Probability | [`probability`] | Fullness → deflection chance → draw |
//! | Weights | [`weights`] | Learned preference over alternate neighbors |
//! | Loop filter | [`loop_filter`] | Never bounce back to the last deflector |
//! | Flow cache | [`flow_cache`] | Per-flow memo with hysteresis |
//! | Arbiter | [`arbiter`] | One engine per node, composes the above |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod arbiter;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod environment;
pub mod flow_cache;
pub mod forwarding;
pub mod loop_filter;
pub mod packet;
pub mod path_tag;
pub mod probability;
pub mod sampling;
pub mod stats;
pub mod time;
pub mod weights;

pub use arbiter::DeflectionArbiter;
pub use checkpoint::CheckpointSet;
pub use config::{DeflectionConfig, DeflectionThresholds, SamplingParams};
pub use environment::{NodeEnvironment, StaticEnvironment};
pub use forwarding::ForwardingTable;
pub use packet::{FlowKey, Ipv4Meta, PacketHandle, SimPacket, TransportHeader};
pub use path_tag::DeflectionPath;
pub use probability::ProbabilityMode;
pub use sampling::{DrawSource, RandomDraws};
pub use stats::DecisionStats;
pub use time::SimTime;

/// Node identifier as used by the forwarding state (sentinels are negative)
pub type NodeId = i32;

#[derive(Error, Debug)]
pub enum DeflectionError {
    #[error("Invalid next hop {hop} for destination {destination}")]
    InvalidNextHop { destination: NodeId, hop: NextHopOption },
    #[error("Destination {0} outside of forwarding table (size {1})")]
    UnknownDestination(NodeId, usize),
    #[error("No checkpoint with threshold {0}")]
    UnknownCheckpoint(f64),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Malformed path tag: {0}")]
    MalformedPathTag(String),
    #[error("Sampling distribution error: {0}")]
    Sampling(String),
}

pub type Result<T> = std::result::Result<T, DeflectionError>;

/// One candidate hop: neighbor node plus the interface pair that reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextHopOption {
    pub next_node_id: NodeId,
    pub own_if_id: i32,
    pub next_if_id: i32,
}

impl NextHopOption {
    /// No route to the destination
    pub const INVALID: NextHopOption = NextHopOption::new(-2, -2, -2);
    /// Packet must be dropped at this hop
    pub const DROP: NextHopOption = NextHopOption::new(-1, -1, -1);

    pub const fn new(next_node_id: NodeId, own_if_id: i32, next_if_id: i32) -> Self {
        Self {
            next_node_id,
            own_if_id,
            next_if_id,
        }
    }

    /// All three ids are non-negative
    pub fn is_valid(&self) -> bool {
        self.next_node_id >= 0 && self.own_if_id >= 0 && self.next_if_id >= 0
    }

    pub fn is_invalid_sentinel(&self) -> bool {
        *self == Self::INVALID
    }
}

impl fmt::Display for NextHopOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.next_node_id, self.own_if_id, self.next_if_id
        )
    }
}

impl From<(i32, i32, i32)> for NextHopOption {
    fn from((next_node_id, own_if_id, next_if_id): (i32, i32, i32)) -> Self {
        Self::new(next_node_id, own_if_id, next_if_id)
    }
}

/// Outcome of one per-packet decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HopDecision {
    /// Default (index 0) route
    Forward { hop: NextHopOption },
    /// Alternate neighbor chosen; `index` points into the forwarding entry
    Deflect { hop: NextHopOption, index: usize },
    /// Urgent path gave up on the packet
    Drop,
    /// Forwarding entry is empty
    NoRoute,
    /// Default candidate carries negative ids; upstream drops it
    Unroutable { hop: NextHopOption },
}

impl HopDecision {
    /// Tuple form expected by the simulator, sentinels included
    pub fn next_hop(&self) -> NextHopOption {
        match *self {
            HopDecision::Forward { hop } | HopDecision::Deflect { hop, .. } => hop,
            HopDecision::Unroutable { hop } => hop,
            HopDecision::Drop => NextHopOption::DROP,
            HopDecision::NoRoute => NextHopOption::INVALID,
        }
    }

    pub fn is_deflected(&self) -> bool {
        matches!(self, HopDecision::Deflect { .. })
    }
}
