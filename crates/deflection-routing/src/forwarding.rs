//! Precomputed forwarding state of one node
//!
//! For every destination an ordered list of candidate hops. Index 0 is the
//! default shortest-path hop; anything after it is a deflection alternative.

use crate::{DeflectionError, NextHopOption, NodeId, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardingTable {
    entries: Vec<Vec<NextHopOption>>,
}

impl ForwardingTable {
    /// Table for `num_nodes` destinations, all without next hops
    pub fn new(num_nodes: usize) -> Self {
        Self {
            entries: vec![Vec::new(); num_nodes],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.entries.len()
    }

    /// Replace the entry for `destination` wholesale.
    ///
    /// Any negative id (including the no-route sentinel) is a caller error.
    pub fn set(&mut self, destination: NodeId, next_hops: Vec<NextHopOption>) -> Result<()> {
        let slot = usize::try_from(destination)
            .ok()
            .filter(|&d| d < self.entries.len())
            .ok_or(DeflectionError::UnknownDestination(
                destination,
                self.entries.len(),
            ))?;
        if let Some(bad) = next_hops.iter().find(|hop| !hop.is_valid()) {
            return Err(DeflectionError::InvalidNextHop {
                destination,
                hop: *bad,
            });
        }
        self.entries[slot] = next_hops;
        Ok(())
    }

    /// Candidates for `destination`; empty for unknown destinations
    pub fn get(&self, destination: NodeId) -> &[NextHopOption] {
        usize::try_from(destination)
            .ok()
            .and_then(|d| self.entries.get(d))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn render(&self, node_id: NodeId) -> String {
        let mut out = format!("Deflection forward state of node {}\n", node_id);
        for (destination, next_hops) in self.entries.iter().enumerate() {
            let hops = if next_hops.is_empty() {
                "(no next hops)".to_string()
            } else {
                let hops: Vec<String> = next_hops.iter().map(|h| h.to_string()).collect();
                hops.join(", ")
            };
            out.push_str(&format!("  -> {}: {}\n", destination, hops));
        }
        out
    }
}
