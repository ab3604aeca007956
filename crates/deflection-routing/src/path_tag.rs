//! Deflection path state carried with a packet
//!
//! Records every node that deflected the packet, oldest first. The arbiter
//! reads the last deflector (loop avoidance) and the count (deflection cap)
//! and appends itself when it deflects.
//!
//! Byte layout used by [`DeflectionPath::encode`]:
//!
//! ```text
//! +------------+------------+-----+------------+
//! | count: u32 | node 0: u32| ... | node n: u32|   little endian
//! +------------+------------+-----+------------+
//! ```

use crate::{DeflectionError, NodeId, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on decoded path length; a longer header is treated as corrupt
pub const MAX_ENCODED_PATH: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeflectionPath {
    path: Vec<NodeId>,
}

impl DeflectionPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(path: Vec<NodeId>) -> Self {
        Self { path }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.path
    }

    /// Node that most recently deflected the packet
    pub fn last_node(&self) -> Option<NodeId> {
        self.path.last().copied()
    }

    /// Deflections so far, saturating at `u8::MAX`
    pub fn deflection_count(&self) -> u8 {
        u8::try_from(self.path.len()).unwrap_or(u8::MAX)
    }

    pub fn push(&mut self, node_id: NodeId) {
        self.path.push(node_id);
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        4 + 4 * self.path.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.path.len() as u32).to_le_bytes());
        for node in &self.path {
            out.extend_from_slice(&(*node as u32).to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (count, rest) = split_u32(bytes)
            .ok_or_else(|| DeflectionError::MalformedPathTag("missing length".to_string()))?;
        let count = count as usize;
        if count > MAX_ENCODED_PATH {
            return Err(DeflectionError::MalformedPathTag(format!(
                "length {} exceeds {}",
                count, MAX_ENCODED_PATH
            )));
        }
        if rest.len() != count * 4 {
            return Err(DeflectionError::MalformedPathTag(format!(
                "expected {} bytes of path, found {}",
                count * 4,
                rest.len()
            )));
        }
        let path = rest
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as NodeId)
            .collect();
        Ok(Self { path })
    }
}

fn split_u32(bytes: &[u8]) -> Option<(u32, &[u8])> {
    if bytes.len() < 4 {
        return None;
    }
    let (head, rest) = bytes.split_at(4);
    Some((u32::from_le_bytes([head[0], head[1], head[2], head[3]]), rest))
}

impl fmt::Display for DeflectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<String> = self.path.iter().map(|n| n.to_string()).collect();
        write!(f, "Path=[{}]", nodes.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path() {
        let path = DeflectionPath::new();
        assert_eq!(path.last_node(), None);
        assert_eq!(path.deflection_count(), 0);
        assert_eq!(path.to_string(), "Path=[]");
    }

    #[test]
    fn test_push_updates_last_and_count() {
        let mut path = DeflectionPath::new();
        path.push(12);
        path.push(40);
        assert_eq!(path.last_node(), Some(40));
        assert_eq!(path.deflection_count(), 2);
        assert_eq!(path.to_string(), "Path=[12 -> 40]");
    }

    #[test]
    fn test_count_saturates() {
        let path = DeflectionPath::from_nodes(vec![1; 300]);
        assert_eq!(path.deflection_count(), u8::MAX);
    }

    #[test]
    fn test_encode_layout() {
        let path = DeflectionPath::from_nodes(vec![5, 258]);
        let bytes = path.encode();
        assert_eq!(bytes.len(), path.encoded_len());
        assert_eq!(&bytes[..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[2, 1, 0, 0]);
        assert_eq!(DeflectionPath::decode(&bytes).unwrap(), path);
    }

    #[test]
    fn test_decode_truncated() {
        let mut bytes = DeflectionPath::from_nodes(vec![1, 2, 3]).encode();
        bytes.pop();
        assert!(matches!(
            DeflectionPath::decode(&bytes),
            Err(DeflectionError::MalformedPathTag(_))
        ));
        assert!(DeflectionPath::decode(&[1, 0]).is_err());
    }

    #[test]
    fn test_decode_oversized_length() {
        let bytes = (MAX_ENCODED_PATH as u32 + 1).to_le_bytes();
        assert!(DeflectionPath::decode(&bytes).is_err());
    }
}
