//! One-hop loop avoidance
//!
//! Before a deflection target is picked, alternatives leading back to the
//! node that last deflected the packet are removed. The baseline candidate at
//! index 0 always survives so the filtered list keeps the same shape as the
//! original one.

use crate::{NextHopOption, NodeId};

/// Candidate list after loop filtering
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCandidates {
    /// Surviving candidates; index 0 is the baseline
    pub options: Vec<NextHopOption>,
    /// `original_index[i]` is the position of `options[i]` in the input list
    pub original_index: Vec<usize>,
    /// Selection weights of `options[1..]`, normalized to sum 1
    pub weights: Vec<f64>,
    /// Mean raw weight of the surviving alternatives
    pub raw_mean: f64,
}

impl FilteredCandidates {
    /// At least one alternative survived
    pub fn can_deflect(&self) -> bool {
        self.options.len() > 1
    }

    pub fn alternatives(&self) -> usize {
        self.options.len().saturating_sub(1)
    }

    /// Map an index into `options` back to the unfiltered list
    pub fn to_original(&self, filtered: usize) -> Option<usize> {
        self.original_index.get(filtered).copied()
    }
}

/// Drop alternatives whose neighbor is `last_deflector`.
///
/// `raw_weights` runs parallel to `candidates` (entry 0 unused); when it is
/// empty every surviving alternative gets the same weight. With
/// `allow_repeated` set nothing is filtered.
pub fn remove_last_hop(
    candidates: &[NextHopOption],
    raw_weights: &[f64],
    last_deflector: Option<NodeId>,
    allow_repeated: bool,
) -> FilteredCandidates {
    let mut options = Vec::with_capacity(candidates.len());
    let mut original_index = Vec::with_capacity(candidates.len());
    let mut raw = Vec::with_capacity(candidates.len().saturating_sub(1));

    for (i, hop) in candidates.iter().enumerate() {
        let blocked = i > 0
            && !allow_repeated
            && last_deflector.map_or(false, |last| hop.next_node_id == last);
        if blocked {
            continue;
        }
        options.push(*hop);
        original_index.push(i);
        if i > 0 {
            let w = if raw_weights.is_empty() {
                1.0
            } else {
                raw_weights.get(i).copied().unwrap_or(0.0).max(0.0)
            };
            raw.push(w);
        }
    }

    let raw_mean = if raw.is_empty() {
        0.0
    } else {
        raw.iter().sum::<f64>() / raw.len() as f64
    };
    let weights = normalize(&raw);

    FilteredCandidates {
        options,
        original_index,
        weights,
        raw_mean,
    }
}

/// Scale to sum 1; an all-zero vector becomes uniform
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if weights.is_empty() {
        Vec::new()
    } else if sum > 0.0 && sum.is_finite() {
        weights.iter().map(|w| w / sum).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}
