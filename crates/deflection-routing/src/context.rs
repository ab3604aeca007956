//! Per-decision routing context

use crate::packet::{FlowKey, Ipv4Meta};
use crate::time::SimTime;
use crate::{NextHopOption, NodeId};

/// Everything one decision reads; built fresh for every packet
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingContext {
    pub target_node_id: NodeId,
    pub ip: Ipv4Meta,
    /// The request targets the source IP and carries no transport header
    pub is_source_ip_probe: bool,
    pub flow: FlowKey,
    pub last_deflector: Option<NodeId>,
    pub deflection_count: u8,
    /// Candidates from the forwarding table; index 0 is the default hop
    pub candidates: Vec<NextHopOption>,
    /// Raw neighbor weights parallel to `candidates`; empty when weights are off
    pub weights: Vec<f64>,
    /// Occupancy of the default hop's queue
    pub fullness: f64,
    pub now: SimTime,
}

impl RoutingContext {
    pub fn default_hop(&self) -> Option<NextHopOption> {
        self.candidates.first().copied()
    }

    pub fn ttl(&self) -> u8 {
        self.ip.ttl
    }
}
