//! Simulation clock types
//!
//! All expiry and decay arithmetic runs on the simulator's logical clock.
//! Wall-clock time never enters a decision.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Logical timestamp, nanoseconds since simulation start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(i64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn since(&self, earlier: SimTime) -> Duration {
        Duration::nanoseconds(self.0.saturating_sub(earlier.0).max(0))
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        let nanos = rhs.num_nanoseconds().unwrap_or(i64::MAX);
        SimTime(self.0.saturating_add(nanos))
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Duration {
        Duration::nanoseconds(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.as_millis_f64())
    }
}

/// Number of whole `tick`s contained in `elapsed`; zero for a non-positive tick
pub fn whole_ticks(elapsed: Duration, tick: Duration) -> i64 {
    match (elapsed.num_nanoseconds(), tick.num_nanoseconds()) {
        (Some(e), Some(t)) if t > 0 && e > 0 => e / t,
        _ => 0,
    }
}
