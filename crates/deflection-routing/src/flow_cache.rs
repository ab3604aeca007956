//! Per-flow decision cache
//!
//! Memoizes the decision for a flow together with the operating point it
//! was made at (fullness, TTL). A cached decision is reused until it expires
//! or conditions move decisively away from that operating point:
//!
//! | Condition | Reason |
//! |-----------|--------|
//! | `now >= expires_at` | [`StaleReason::Expired`] |
//! | `ttl < min_ttl` | [`StaleReason::TtlDropped`] (path got longer) |
//! | deflecting and fullness `<= 0` or `< recorded - band` | [`StaleReason::CongestionCleared`] |
//! | forwarding and fullness `>= 1` or `> recorded + band` | [`StaleReason::CongestionAppeared`] |
//! | cached urgent drop, packet not urgent | [`StaleReason::UrgentDrop`] |
//! | cached target is the packet's last deflector | [`StaleReason::LoopBack`] (checked by the caller) |
//!
//! There is no background sweep; staleness is only evaluated on access.

use crate::config::DeflectionThresholds;
use crate::packet::FlowKey;
use crate::time::SimTime;
use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Cached index meaning "drop the packet"
pub const DROP_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheEntry {
    /// -1 drop, 0 forward, >0 deflect to that candidate
    pub index: i32,
    /// Lowest TTL expected for this flow before the path is suspect
    pub min_ttl: u8,
    /// Default queue fullness when the decision was made
    pub fullness: f64,
    pub expires_at: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    Expired,
    TtlDropped,
    CongestionCleared,
    CongestionAppeared,
    /// Entry holds an urgent drop; only urgent packets may be dropped
    UrgentDrop,
    /// Entry would send the packet back to the node that deflected it
    LoopBack,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StaleReason::Expired => "expired",
            StaleReason::TtlDropped => "ttl dropped",
            StaleReason::CongestionCleared => "congestion cleared",
            StaleReason::CongestionAppeared => "congestion appeared",
            StaleReason::UrgentDrop => "urgent drop",
            StaleReason::LoopBack => "loop back",
        };
        f.write_str(s)
    }
}

/// How a lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    Stale(StaleReason),
}

/// Current conditions a cached entry is checked against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheProbe {
    pub now: SimTime,
    pub ttl: u8,
    pub fullness: f64,
}

#[derive(Debug, Clone)]
pub struct FlowCache {
    entries: HashMap<FlowKey, CacheEntry>,
    expire: Duration,
    urgent_expire: Duration,
    hysteresis_band: f64,
    ttl_hop_limit: u8,
    min_ttl_cap: u8,
    refresh_period: Duration,
    last_refresh: SimTime,
}

impl FlowCache {
    pub fn new(thresholds: &DeflectionThresholds) -> Self {
        Self {
            entries: HashMap::new(),
            expire: thresholds.expire_duration(),
            urgent_expire: thresholds.urgent_expire_duration(),
            hysteresis_band: thresholds.hysteresis_band,
            ttl_hop_limit: thresholds.ttl_hop_limit,
            min_ttl_cap: thresholds.urgent_ttl,
            refresh_period: thresholds.cache_refresh_period(),
            last_refresh: SimTime::ZERO,
        }
    }

    /// Clear everything when the refresh period has elapsed; a zero period
    /// never clears
    pub fn maybe_refresh(&mut self, now: SimTime) -> bool {
        if self.refresh_period <= Duration::zero() {
            return false;
        }
        if now.since(self.last_refresh) < self.refresh_period {
            return false;
        }
        info!(
            "Flow cache refresh at {}: dropping {} entries",
            now,
            self.entries.len()
        );
        self.entries.clear();
        self.last_refresh = now;
        true
    }

    /// Why `entry` cannot serve a non-urgent lookup, if at all
    pub fn invalidation(&self, entry: &CacheEntry, probe: &CacheProbe) -> Option<StaleReason> {
        if probe.now >= entry.expires_at {
            return Some(StaleReason::Expired);
        }
        if entry.index == DROP_INDEX {
            return Some(StaleReason::UrgentDrop);
        }
        if probe.ttl < entry.min_ttl {
            return Some(StaleReason::TtlDropped);
        }
        let band = self.hysteresis_band;
        if entry.index != 0 {
            if probe.fullness <= 0.0 || probe.fullness < entry.fullness - band {
                return Some(StaleReason::CongestionCleared);
            }
        } else if probe.fullness >= 1.0 || probe.fullness > entry.fullness + band {
            return Some(StaleReason::CongestionAppeared);
        }
        None
    }

    /// Cached index for `key`, or the result of `compute` recorded afresh
    pub fn resolve(
        &mut self,
        key: FlowKey,
        probe: CacheProbe,
        compute: impl FnOnce() -> i32,
    ) -> (i32, CacheLookup) {
        self.resolve_with(key, probe, |_| None, compute)
    }

    /// Like [`resolve`](Self::resolve), with `reject` vetoing entries that
    /// pass the built-in checks
    pub fn resolve_with(
        &mut self,
        key: FlowKey,
        probe: CacheProbe,
        reject: impl FnOnce(&CacheEntry) -> Option<StaleReason>,
        compute: impl FnOnce() -> i32,
    ) -> (i32, CacheLookup) {
        let lookup = match self.entries.get(&key) {
            None => CacheLookup::Miss,
            Some(entry) => match self.invalidation(entry, &probe).or_else(|| reject(entry)) {
                Some(reason) => CacheLookup::Stale(reason),
                None => CacheLookup::Hit,
            },
        };

        if lookup == CacheLookup::Hit {
            let expire = self.expire;
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.expires_at = probe.now + expire;
                return (entry.index, lookup);
            }
        }

        let index = compute();
        self.record(key, index, &probe, self.expire);
        (index, lookup)
    }

    /// Record an urgent-path decision with the short urgent lifetime
    pub fn record_urgent(&mut self, key: FlowKey, index: i32, probe: &CacheProbe) {
        self.record(key, index, probe, self.urgent_expire);
    }

    /// Overwrite the entry for `key` as a whole
    pub fn record(&mut self, key: FlowKey, index: i32, probe: &CacheProbe, lifetime: Duration) {
        let entry = CacheEntry {
            index,
            min_ttl: self.min_ttl_for(probe.ttl),
            fullness: probe.fullness,
            expires_at: probe.now + lifetime,
        };
        self.entries.insert(key, entry);
    }

    /// `min(cap, ttl - hop_limit)`
    pub fn min_ttl_for(&self, ttl: u8) -> u8 {
        self.min_ttl_cap.min(ttl.saturating_sub(self.ttl_hop_limit))
    }

    pub fn get(&self, key: &FlowKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn render(&self) -> String {
        let mut keys: Vec<&FlowKey> = self.entries.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            let e = &self.entries[key];
            out.push_str(&format!(
                "  {} => idx {} min_ttl {} fullness {:.4} expires {}\n",
                key, e.index, e.min_ttl, e.fullness, e.expires_at
            ));
        }
        out
    }
}
