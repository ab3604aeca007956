//! Engine configuration
//!
//! All tuning knobs of the arbiter live here and are supplied at
//! construction. Every field has a default, so a partial JSON document is a
//! valid configuration.

use crate::checkpoint::CheckpointSet;
use crate::probability::ProbabilityMode;
use crate::{DeflectionError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Top-level arbiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeflectionConfig {
    /// Checkpoints that gate deflection
    pub enabled_checkpoints: CheckpointSet,
    pub probability_mode: ProbabilityMode,
    /// Memoize decisions per flow
    pub use_cache: bool,
    /// Learn and apply per-neighbor weights
    pub use_weights: bool,
    /// Blend the mean neighbor weight into the deflection chance
    pub weight_bias: bool,
    /// Allow deflecting back through the node that last deflected the packet
    pub repeated_deflections: bool,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
    pub thresholds: DeflectionThresholds,
    pub sampling: SamplingParams,
}

impl Default for DeflectionConfig {
    fn default() -> Self {
        Self {
            enabled_checkpoints: CheckpointSet::default(),
            probability_mode: ProbabilityMode::Ramped,
            use_cache: true,
            use_weights: true,
            weight_bias: false,
            repeated_deflections: false,
            seed: None,
            thresholds: DeflectionThresholds::default(),
            sampling: SamplingParams::default(),
        }
    }
}

impl DeflectionConfig {
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.sampling.validate()
    }
}

/// Timing, hysteresis and learning thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeflectionThresholds {
    /// Lifetime of a flow cache entry (ms)
    pub expire_ms: u64,
    /// Lifetime of an urgent-path cache entry (ms)
    pub urgent_expire_ms: u64,
    /// Fullness must leave `recorded ± band` before a cached decision flips
    pub hysteresis_band: f64,
    /// Subtracted from the TTL when recording the minimum expected TTL
    pub ttl_hop_limit: u8,
    /// Packets with a TTL below this take the urgent path
    pub urgent_ttl: u8,
    /// Packets deflected more often than this take the urgent path
    pub max_deflections: u8,
    /// Share of the pull toward uniform per decay tick (0..=1)
    pub decay_rate: f64,
    /// Length of one decay tick (ms); 0 disables decay
    pub decay_tick_ms: u64,
    /// Divisor applied to a neighbor weight when a loop is detected (>= 1)
    pub learn_rate: f64,
    /// Full flow cache clear period (ms); 0 means never
    pub cache_refresh_ms: u64,
}

impl Default for DeflectionThresholds {
    fn default() -> Self {
        Self {
            expire_ms: 100,
            urgent_expire_ms: 10,
            hysteresis_band: 0.10,
            ttl_hop_limit: 8,
            urgent_ttl: 3,
            max_deflections: 3,
            decay_rate: 0.05,
            decay_tick_ms: 10,
            learn_rate: 2.0,
            cache_refresh_ms: 0,
        }
    }
}

impl DeflectionThresholds {
    pub fn expire_duration(&self) -> Duration {
        millis(self.expire_ms)
    }

    pub fn urgent_expire_duration(&self) -> Duration {
        millis(self.urgent_expire_ms)
    }

    pub fn decay_tick(&self) -> Duration {
        millis(self.decay_tick_ms)
    }

    pub fn cache_refresh_period(&self) -> Duration {
        millis(self.cache_refresh_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.hysteresis_band) {
            return Err(invalid(format!(
                "hysteresis_band {} outside [0, 1]",
                self.hysteresis_band
            )));
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(invalid(format!("decay_rate {} outside [0, 1]", self.decay_rate)));
        }
        if !self.learn_rate.is_finite() || self.learn_rate < 1.0 {
            return Err(invalid(format!("learn_rate {} must be >= 1", self.learn_rate)));
        }
        Ok(())
    }
}

/// Distribution parameters; experimental tuning constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Exponent base of the ramped chance: `fullness ^ (base ^ (passed - 1))`
    pub ramp_base: f64,
    pub deflection_mean: f64,
    pub deflection_sd: f64,
    pub urgent_mean: f64,
    pub urgent_sd: f64,
    /// Share of the weight bias when `weight_bias` is enabled
    pub weight_bias_share: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            ramp_base: 0.9,
            deflection_mean: 0.5,
            deflection_sd: 0.15,
            urgent_mean: 2.0,
            urgent_sd: 0.1,
            weight_bias_share: 0.25,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.ramp_base > 0.0 && self.ramp_base <= 1.0) {
            return Err(invalid(format!("ramp_base {} outside (0, 1]", self.ramp_base)));
        }
        for (name, sd) in [("deflection_sd", self.deflection_sd), ("urgent_sd", self.urgent_sd)] {
            if !sd.is_finite() || sd < 0.0 {
                return Err(invalid(format!("{} {} must be finite and >= 0", name, sd)));
            }
        }
        if !self.deflection_mean.is_finite() || !self.urgent_mean.is_finite() {
            return Err(invalid("distribution means must be finite".to_string()));
        }
        if !(0.0..=1.0).contains(&self.weight_bias_share) {
            return Err(invalid(format!(
                "weight_bias_share {} outside [0, 1]",
                self.weight_bias_share
            )));
        }
        Ok(())
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(i64::MAX as u64 / 1_000_000) as i64)
}

fn invalid(msg: String) -> DeflectionError {
    DeflectionError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        DeflectionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{ "use_cache": false, "thresholds": { "max_deflections": 5 } }"#;
        let config: DeflectionConfig = serde_json::from_str(json).unwrap();
        assert!(!config.use_cache);
        assert_eq!(config.thresholds.max_deflections, 5);
        assert_eq!(config.thresholds.expire_ms, 100);
        assert_eq!(config.probability_mode, ProbabilityMode::Ramped);
        assert_eq!(config.enabled_checkpoints, CheckpointSet::EMPTY_QUEUE_ONLY);
    }

    #[test]
    fn test_bad_learn_rate_rejected() {
        let mut config = DeflectionConfig::default();
        config.thresholds.learn_rate = 0.5;
        assert!(matches!(config.validate(), Err(DeflectionError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_band_rejected() {
        let mut config = DeflectionConfig::default();
        config.thresholds.hysteresis_band = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_sd_rejected() {
        let mut config = DeflectionConfig::default();
        config.sampling.urgent_sd = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let t = DeflectionThresholds::default();
        assert_eq!(t.expire_duration(), Duration::milliseconds(100));
        assert_eq!(t.cache_refresh_period(), Duration::zero());
    }
}
