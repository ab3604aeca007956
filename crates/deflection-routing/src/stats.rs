//! Decision counters of one arbiter

use crate::flow_cache::{CacheLookup, StaleReason};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStats {
    pub decisions: u64,
    pub forwarded: u64,
    pub deflected: u64,
    pub dropped: u64,
    pub no_route: u64,
    pub unroutable: u64,
    /// Decisions that went through the deflection pipeline
    pub deflectable: u64,
    pub urgent: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stale_expired: u64,
    pub stale_ttl: u64,
    pub stale_cleared: u64,
    pub stale_appeared: u64,
    pub stale_urgent: u64,
    pub stale_loop: u64,
    pub out_of_range: u64,
    pub loop_penalties: u64,
    pub cache_clears: u64,
}

impl DecisionStats {
    pub fn record_lookup(&mut self, lookup: CacheLookup) {
        match lookup {
            CacheLookup::Hit => self.cache_hits += 1,
            CacheLookup::Miss => self.cache_misses += 1,
            CacheLookup::Stale(StaleReason::Expired) => self.stale_expired += 1,
            CacheLookup::Stale(StaleReason::TtlDropped) => self.stale_ttl += 1,
            CacheLookup::Stale(StaleReason::CongestionCleared) => self.stale_cleared += 1,
            CacheLookup::Stale(StaleReason::CongestionAppeared) => self.stale_appeared += 1,
            CacheLookup::Stale(StaleReason::UrgentDrop) => self.stale_urgent += 1,
            CacheLookup::Stale(StaleReason::LoopBack) => self.stale_loop += 1,
        }
    }

    pub fn stale(&self) -> u64 {
        self.stale_expired
            + self.stale_ttl
            + self.stale_cleared
            + self.stale_appeared
            + self.stale_urgent
            + self.stale_loop
    }

    /// Share of deflectable decisions that were deflected
    pub fn deflection_ratio(&self) -> f64 {
        if self.deflectable == 0 {
            0.0
        } else {
            self.deflected as f64 / self.deflectable as f64
        }
    }
}

impl fmt::Display for DecisionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "decisions={} forwarded={} deflected={} dropped={} no_route={} urgent={} \
             cache(hit={} miss={} stale={}) loops={} clears={}",
            self.decisions,
            self.forwarded,
            self.deflected,
            self.dropped,
            self.no_route,
            self.urgent,
            self.cache_hits,
            self.cache_misses,
            self.stale(),
            self.loop_penalties,
            self.cache_clears
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup() {
        let mut stats = DecisionStats::default();
        stats.record_lookup(CacheLookup::Hit);
        stats.record_lookup(CacheLookup::Miss);
        stats.record_lookup(CacheLookup::Stale(StaleReason::TtlDropped));
        stats.record_lookup(CacheLookup::Stale(StaleReason::Expired));
        stats.record_lookup(CacheLookup::Stale(StaleReason::LoopBack));
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.stale_loop, 1);
        assert_eq!(stats.stale(), 3);
    }

    #[test]
    fn test_deflection_ratio() {
        let mut stats = DecisionStats::default();
        assert_eq!(stats.deflection_ratio(), 0.0);
        stats.deflectable = 4;
        stats.deflected = 1;
        assert_eq!(stats.deflection_ratio(), 0.25);
    }
}
