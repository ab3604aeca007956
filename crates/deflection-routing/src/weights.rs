//! Per-destination neighbor weights
//!
//! Each deflectable destination keeps a preference score per alternate
//! neighbor. Scores start uniform, relax back toward uniform every decay
//! tick, and are divided by the learn rate whenever a packet arrives that was
//! last deflected by that neighbor (it doubled back). There is no reward
//! path; neighbors only ever lose weight relative to uniform.

use crate::config::DeflectionThresholds;
use crate::time::{whole_ticks, SimTime};
use crate::{NextHopOption, NodeId};
use chrono::Duration;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

const SUM_EPSILON: f64 = 1e-12;

/// Weight vector for one destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborWeights {
    weights: BTreeMap<NodeId, f64>,
    last_decay: SimTime,
}

impl NeighborWeights {
    /// `1/n` for each distinct neighbor
    pub fn uniform(neighbors: &BTreeSet<NodeId>, now: SimTime) -> Self {
        let share = if neighbors.is_empty() {
            0.0
        } else {
            1.0 / neighbors.len() as f64
        };
        Self {
            weights: neighbors.iter().map(|&n| (n, share)).collect(),
            last_decay: now,
        }
    }

    pub fn get(&self, neighbor: NodeId) -> Option<f64> {
        self.weights.get(&neighbor).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.weights.iter().map(|(&n, &w)| (n, w))
    }

    pub fn last_decay(&self) -> SimTime {
        self.last_decay
    }

    /// Make the tracked neighbor set equal `neighbors`, preserving the sum.
    ///
    /// Newcomers enter at zero and grow through decay.
    pub fn reconcile(&mut self, neighbors: &BTreeSet<NodeId>) {
        let old_sum = self.sum();
        self.weights.retain(|n, _| neighbors.contains(n));
        for &n in neighbors {
            self.weights.entry(n).or_insert(0.0);
        }
        if self.weights.is_empty() {
            return;
        }

        let new_sum = self.sum();
        if new_sum > SUM_EPSILON {
            let scale = old_sum / new_sum;
            if (scale - 1.0).abs() > SUM_EPSILON {
                for w in self.weights.values_mut() {
                    *w *= scale;
                }
            }
        } else {
            // every surviving neighbor is a newcomer: restart from uniform
            let total = if old_sum > SUM_EPSILON { old_sum } else { 1.0 };
            let share = total / self.weights.len() as f64;
            for w in self.weights.values_mut() {
                *w = share;
            }
        }
    }

    /// Apply `ticks` rounds of `w ← (1 - rate)·w + rate·(1/n)`
    pub fn decay(&mut self, ticks: i64, rate: f64) {
        if ticks <= 0 || rate <= 0.0 || self.weights.is_empty() {
            return;
        }
        let uniform = 1.0 / self.weights.len() as f64;
        let keep = (1.0 - rate).powi(ticks.min(i32::MAX as i64) as i32);
        for w in self.weights.values_mut() {
            *w = uniform + keep * (*w - uniform);
        }
    }

    /// Divide `neighbor`'s weight by `learn_rate`; false if it is not tracked
    pub fn bump_down(&mut self, neighbor: NodeId, learn_rate: f64) -> bool {
        match self.weights.get_mut(&neighbor) {
            Some(w) => {
                *w /= learn_rate;
                true
            }
            None => false,
        }
    }

    /// Normalized selection probability of `neighbor` among all tracked ones
    pub fn probability(&self, neighbor: NodeId) -> Option<f64> {
        let sum = self.sum();
        self.get(neighbor)
            .map(|w| if sum > SUM_EPSILON { w / sum } else { 0.0 })
    }
}

/// Weight vectors of every destination this node deflects for
#[derive(Debug, Clone)]
pub struct NeighborWeightTable {
    tables: HashMap<NodeId, NeighborWeights>,
    decay_rate: f64,
    decay_tick: Duration,
    learn_rate: f64,
}

impl NeighborWeightTable {
    pub fn new(thresholds: &DeflectionThresholds) -> Self {
        Self {
            tables: HashMap::new(),
            decay_rate: thresholds.decay_rate,
            decay_tick: thresholds.decay_tick(),
            learn_rate: thresholds.learn_rate,
        }
    }

    /// Create, reconcile, and decay the vector for `destination`
    pub fn handle_weights(
        &mut self,
        destination: NodeId,
        candidates: &[NextHopOption],
        now: SimTime,
    ) {
        let neighbors = alternate_neighbors(candidates);
        if neighbors.is_empty() {
            warn!(
                "No alternate neighbors for destination {}, weights untouched",
                destination
            );
            return;
        }

        match self.tables.entry(destination) {
            Entry::Vacant(slot) => {
                debug!(
                    "Creating uniform weights for destination {} over {} neighbors",
                    destination,
                    neighbors.len()
                );
                slot.insert(NeighborWeights::uniform(&neighbors, now));
            }
            Entry::Occupied(mut slot) => {
                let weights = slot.get_mut();
                weights.reconcile(&neighbors);
                let ticks = whole_ticks(now.since(weights.last_decay), self.decay_tick);
                if ticks > 0 {
                    weights.decay(ticks, self.decay_rate);
                    let ticks = ticks.min(i32::MAX as i64) as i32;
                    weights.last_decay = weights.last_decay + self.decay_tick * ticks;
                }
            }
        }
    }

    /// Penalize the neighbor the packet was last deflected by, if tracked
    pub fn check_bump_weights(
        &mut self,
        destination: NodeId,
        last_deflector: Option<NodeId>,
    ) -> bool {
        let Some(last) = last_deflector else {
            return false;
        };
        let learn_rate = self.learn_rate;
        let bumped = self
            .tables
            .get_mut(&destination)
            .map_or(false, |w| w.bump_down(last, learn_rate));
        if bumped {
            debug!(
                "Loop via neighbor {} for destination {}, weight divided by {}",
                last, destination, self.learn_rate
            );
        }
        bumped
    }

    pub fn weights_for(&self, destination: NodeId) -> Option<&NeighborWeights> {
        self.tables.get(&destination)
    }

    /// Raw weight per candidate, parallel to `candidates`; index 0 is 0.0
    pub fn candidate_weights(&self, destination: NodeId, candidates: &[NextHopOption]) -> Vec<f64> {
        let table = self.tables.get(&destination);
        candidates
            .iter()
            .enumerate()
            .map(|(i, hop)| {
                if i == 0 {
                    0.0
                } else {
                    table.and_then(|t| t.get(hop.next_node_id)).unwrap_or(0.0)
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut destinations: Vec<_> = self.tables.keys().copied().collect();
        destinations.sort_unstable();
        for destination in destinations {
            let weights = &self.tables[&destination];
            let parts: Vec<String> = weights
                .iter()
                .map(|(n, w)| format!("{}={:.4}", n, w))
                .collect();
            out.push_str(&format!("  weights -> {}: {}\n", destination, parts.join(", ")));
        }
        out
    }
}

/// Distinct neighbor ids of the deflection alternatives (index >= 1)
pub fn alternate_neighbors(candidates: &[NextHopOption]) -> BTreeSet<NodeId> {
    candidates.iter().skip(1).map(|h| h.next_node_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hops(neighbors: &[NodeId]) -> Vec<NextHopOption> {
        neighbors
            .iter()
            .enumerate()
            .map(|(i, &n)| NextHopOption::new(n, i as i32, 0))
            .collect()
    }

    fn table() -> NeighborWeightTable {
        NeighborWeightTable::new(&DeflectionThresholds::default())
    }

    #[test]
    fn test_created_uniform_excluding_default() {
        let mut t = table();
        t.handle_weights(9, &hops(&[1, 2, 3]), SimTime::ZERO);
        let w = t.weights_for(9).unwrap();
        assert_eq!(w.len(), 2);
        assert_eq!(w.get(1), None);
        assert!((w.get(2).unwrap() - 0.5).abs() < 1e-12);
        assert!((w.get(3).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reconcile_preserves_sum() {
        let mut w = NeighborWeights::uniform(&[2, 3].into_iter().collect(), SimTime::ZERO);
        w.bump_down(2, 2.0); // 0.25, 0.5
        let before = w.sum();
        w.reconcile(&[3, 4].into_iter().collect());
        assert_eq!(w.len(), 2);
        assert!((w.sum() - before).abs() < 1e-12);
        assert_eq!(w.get(4), Some(0.0));
        assert_eq!(w.get(2), None);
    }

    #[test]
    fn test_reconcile_all_new_restarts_uniform() {
        let mut w = NeighborWeights::uniform(&[2].into_iter().collect(), SimTime::ZERO);
        w.reconcile(&[5, 6].into_iter().collect());
        assert!((w.get(5).unwrap() - 0.5).abs() < 1e-12);
        assert!((w.get(6).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_decay_pulls_toward_uniform() {
        let mut w = NeighborWeights::uniform(&[2, 3].into_iter().collect(), SimTime::ZERO);
        w.bump_down(2, 4.0); // 0.125 vs 0.5
        let gap_before = (w.get(2).unwrap() - 0.5).abs();
        w.decay(1, 0.5);
        let gap_after = (w.get(2).unwrap() - 0.5).abs();
        assert!(gap_after < gap_before);
        // one tick at rate 0.5: 0.5 * 0.125 + 0.5 * 0.5
        assert!((w.get(2).unwrap() - 0.3125).abs() < 1e-12);
    }

    #[test]
    fn test_decay_once_per_elapsed_tick() {
        let mut t = table(); // tick 10ms, rate 0.05
        let candidates = hops(&[1, 2, 3]);
        t.handle_weights(9, &candidates, SimTime::ZERO);
        t.check_bump_weights(9, Some(2));
        let bumped = t.weights_for(9).unwrap().get(2).unwrap();

        t.handle_weights(9, &candidates, SimTime::from_millis(35));
        let w = t.weights_for(9).unwrap();
        let expected = 0.5 + 0.95_f64.powi(3) * (bumped - 0.5);
        assert!((w.get(2).unwrap() - expected).abs() < 1e-12);
        assert_eq!(w.last_decay(), SimTime::from_millis(30));
    }

    #[test]
    fn test_no_decay_within_tick() {
        let mut t = table();
        let candidates = hops(&[1, 2, 3]);
        t.handle_weights(9, &candidates, SimTime::ZERO);
        t.check_bump_weights(9, Some(3));
        let before = t.weights_for(9).unwrap().clone();
        t.handle_weights(9, &candidates, SimTime::from_millis(9));
        assert_eq!(t.weights_for(9).unwrap(), &before);
    }

    #[test]
    fn test_bump_only_tracked_neighbor() {
        let mut t = table();
        t.handle_weights(9, &hops(&[1, 2, 3]), SimTime::ZERO);
        assert!(!t.check_bump_weights(9, None));
        assert!(!t.check_bump_weights(9, Some(42)));
        assert!(!t.check_bump_weights(8, Some(2)));
        assert!(t.check_bump_weights(9, Some(2)));
        let w = t.weights_for(9).unwrap();
        assert!((w.get(2).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_bumps_lower_probability() {
        let mut w = NeighborWeights::uniform(&[2, 3, 4].into_iter().collect(), SimTime::ZERO);
        let mut last = w.probability(2).unwrap();
        for _ in 0..5 {
            w.bump_down(2, 1.5);
            let p = w.probability(2).unwrap();
            assert!(p < last);
            assert!(p < w.probability(3).unwrap());
            last = p;
        }
        assert!(w.iter().all(|(_, v)| v >= 0.0));
    }

    #[test]
    fn test_candidate_weights_parallel() {
        let mut t = table();
        let candidates = hops(&[1, 2, 3]);
        t.handle_weights(9, &candidates, SimTime::ZERO);
        let raw = t.candidate_weights(9, &candidates);
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0], 0.0);
        assert!((raw[1] - 0.5).abs() < 1e-12);
        assert_eq!(t.candidate_weights(1, &candidates), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_render_sorted() {
        let mut t = table();
        t.handle_weights(5, &hops(&[1, 2]), SimTime::ZERO);
        t.handle_weights(3, &hops(&[1, 4]), SimTime::ZERO);
        let text = t.render();
        let first = text.find("-> 3").unwrap();
        let second = text.find("-> 5").unwrap();
        assert!(first < second);
        assert!(text.contains("4=1.0000"));
    }
}
