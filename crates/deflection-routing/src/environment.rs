//! Collaborators supplied by the simulator
//!
//! Topology lookups, queue occupancy and the logical clock belong to the
//! simulator. The arbiter only sees them through [`NodeEnvironment`].

use crate::time::SimTime;
use crate::NodeId;
use std::collections::{HashMap, HashSet};

pub trait NodeEnvironment {
    /// Occupancy ratio of the outbound queue on `if_id` (0 = empty, 1 = full)
    fn queue_fullness(&self, if_id: i32) -> f64;

    /// `next_node_id` is a ground station reached over a ground station link
    /// on `own_if_id`, and this node is not itself a ground station
    fn is_final_hop_to_ground_station(&self, next_node_id: NodeId, own_if_id: i32) -> bool;

    fn now(&self) -> SimTime;
}

/// Table-driven environment for replays and tests
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    pub now: SimTime,
    /// Interfaces without an entry read as empty
    pub queue_fullness: HashMap<i32, f64>,
    /// (next node, own interface) pairs that are final ground station hops
    pub ground_station_hops: HashSet<(NodeId, i32)>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ground_station_hop(mut self, next_node_id: NodeId, own_if_id: i32) -> Self {
        self.ground_station_hops.insert((next_node_id, own_if_id));
        self
    }

    pub fn set_fullness(&mut self, if_id: i32, fullness: f64) {
        self.queue_fullness.insert(if_id, fullness);
    }

    pub fn advance_to(&mut self, now: SimTime) {
        self.now = now;
    }
}

impl NodeEnvironment for StaticEnvironment {
    fn queue_fullness(&self, if_id: i32) -> f64 {
        self.queue_fullness.get(&if_id).copied().unwrap_or(0.0)
    }

    fn is_final_hop_to_ground_station(&self, next_node_id: NodeId, own_if_id: i32) -> bool {
        self.ground_station_hops.contains(&(next_node_id, own_if_id))
    }

    fn now(&self) -> SimTime {
        self.now
    }
}
