//! Checkpoint table
//!
//! Fifteen fixed queue-fullness thresholds. A configuration enables a subset;
//! only enabled checkpoints take part in gating. Passing is counted as a
//! contiguous prefix: the walk stops at the first enabled checkpoint whose
//! threshold the current fullness does not reach.

use crate::{DeflectionError, Result};
use serde::{Deserialize, Serialize};

/// Number of checkpoints in the table
pub const CHECKPOINT_COUNT: usize = 15;

/// Fullness thresholds, monotonically increasing
pub const CHECKPOINT_THRESHOLDS: [f64; CHECKPOINT_COUNT] = [
    0.00, 0.05, 0.10, 0.20, 0.30, 0.40, 0.50, 0.60, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95, 1.00,
];

/// Tolerance when matching a configured threshold against the table
const THRESHOLD_EPSILON: f64 = 1e-9;

/// A single checkpoint as seen through a [`CheckpointSet`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub threshold: f64,
    pub enabled: bool,
}

/// Bit-set over [`CHECKPOINT_THRESHOLDS`]; bit `i` enables threshold `i`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct CheckpointSet(u16);

impl CheckpointSet {
    /// Nothing enabled: deflection is never considered
    pub const NEVER: CheckpointSet = CheckpointSet(0);
    /// Only the 0% checkpoint: "passed" means "queue non-empty"
    pub const EMPTY_QUEUE_ONLY: CheckpointSet = CheckpointSet(1);
    pub const ALL: CheckpointSet = CheckpointSet((1 << CHECKPOINT_COUNT) - 1);

    pub fn from_bits(bits: u16) -> Self {
        CheckpointSet(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Build from a list of thresholds; every entry must exist in the table
    pub fn from_thresholds(thresholds: &[f64]) -> Result<Self> {
        let mut bits = 0u16;
        for &threshold in thresholds {
            let index = CHECKPOINT_THRESHOLDS
                .iter()
                .position(|t| (t - threshold).abs() < THRESHOLD_EPSILON)
                .ok_or(DeflectionError::UnknownCheckpoint(threshold))?;
            bits |= 1 << index;
        }
        Ok(CheckpointSet(bits))
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.iter()
            .filter(|cp| cp.enabled)
            .map(|cp| cp.threshold)
            .collect()
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        index < CHECKPOINT_COUNT && self.0 & (1 << index) != 0
    }

    /// Walk all fifteen checkpoints in threshold order
    pub fn iter(&self) -> impl Iterator<Item = Checkpoint> + '_ {
        CHECKPOINT_THRESHOLDS
            .iter()
            .enumerate()
            .map(move |(i, &threshold)| Checkpoint {
                threshold,
                enabled: self.is_enabled(i),
            })
    }

    /// Enabled checkpoints passed as an unbroken prefix
    pub fn count_passed(&self, fullness: f64) -> u32 {
        let mut passed = 0;
        for cp in self.iter().filter(|cp| cp.enabled) {
            if fullness >= cp.threshold {
                passed += 1;
            } else {
                break;
            }
        }
        passed
    }

    /// Threshold of the last checkpoint in the passed prefix (0.0 if none)
    pub fn highest_passed(&self, fullness: f64) -> f64 {
        let mut highest = 0.0_f64;
        for cp in self.iter().filter(|cp| cp.enabled) {
            if fullness >= cp.threshold {
                highest = highest.max(cp.threshold);
            } else {
                break;
            }
        }
        highest
    }
}

impl Default for CheckpointSet {
    fn default() -> Self {
        Self::EMPTY_QUEUE_ONLY
    }
}

impl TryFrom<Vec<f64>> for CheckpointSet {
    type Error = DeflectionError;

    fn try_from(thresholds: Vec<f64>) -> Result<Self> {
        Self::from_thresholds(&thresholds)
    }
}

impl From<CheckpointSet> for Vec<f64> {
    fn from(set: CheckpointSet) -> Self {
        set.thresholds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_monotonic() {
        assert!(CHECKPOINT_THRESHOLDS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(CHECKPOINT_THRESHOLDS[0], 0.0);
        assert_eq!(CHECKPOINT_THRESHOLDS[CHECKPOINT_COUNT - 1], 1.0);
    }

    #[test]
    fn test_default_is_non_empty_queue() {
        let set = CheckpointSet::default();
        assert_eq!(set.count_passed(0.0), 1);
        assert_eq!(set.count_passed(0.9), 1);
        assert_eq!(set.count_passed(-0.1), 0);
    }

    #[test]
    fn test_never_passes() {
        assert_eq!(CheckpointSet::NEVER.count_passed(1.0), 0);
        assert_eq!(CheckpointSet::NEVER.highest_passed(1.0), 0.0);
    }

    #[test]
    fn test_contiguous_prefix() {
        let set = CheckpointSet::from_thresholds(&[0.0, 0.5, 0.9]).unwrap();
        assert_eq!(set.count_passed(0.3), 1);
        assert_eq!(set.count_passed(0.6), 2);
        assert_eq!(set.count_passed(0.95), 3);
        assert_eq!(set.highest_passed(0.6), 0.5);
    }

    #[test]
    fn test_prefix_stops_at_first_failure() {
        // 0% is disabled; a fullness below 20% fails the first enabled checkpoint
        let set = CheckpointSet::from_thresholds(&[0.2, 0.3]).unwrap();
        assert_eq!(set.count_passed(0.1), 0);
        assert_eq!(set.count_passed(0.25), 1);
    }

    #[test]
    fn test_unknown_threshold_rejected() {
        assert!(matches!(
            CheckpointSet::from_thresholds(&[0.33]),
            Err(DeflectionError::UnknownCheckpoint(_))
        ));
    }

    #[test]
    fn test_serde_as_threshold_list() {
        let set = CheckpointSet::from_thresholds(&[0.0, 0.75]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[0.0,0.75]");
        let back: CheckpointSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
