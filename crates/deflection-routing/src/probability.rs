//! Deflection probability model
//!
//! Turns the default queue's fullness into a deflection chance, draws a
//! sample and, when the sample falls under the chance, picks an alternate
//! neighbor from the loop-filtered candidates.
//!
//! Ramped chance (default):
//!
//! ```text
//! chance = fullness ^ (base ^ (passed - 1))        base = 0.9
//! ```
//!
//! Each extra checkpoint shrinks the exponent toward 0 and so pushes the
//! chance toward 1 at the same fullness. Static mode returns the threshold of
//! the highest checkpoint passed instead.

use crate::checkpoint::CheckpointSet;
use crate::config::DeflectionConfig;
use crate::context::RoutingContext;
use crate::loop_filter::remove_last_hop;
use crate::sampling::DrawSource;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbabilityMode {
    /// Step function over the enabled checkpoints
    Static,
    #[default]
    Ramped,
}

#[derive(Debug, Clone)]
pub struct ProbabilityModel {
    mode: ProbabilityMode,
    checkpoints: CheckpointSet,
    ramp_base: f64,
    weight_bias: bool,
    weight_bias_share: f64,
    repeated_deflections: bool,
}

impl ProbabilityModel {
    pub fn from_config(config: &DeflectionConfig) -> Self {
        Self {
            mode: config.probability_mode,
            checkpoints: config.enabled_checkpoints,
            ramp_base: config.sampling.ramp_base,
            weight_bias: config.weight_bias && config.use_weights,
            weight_bias_share: config.sampling.weight_bias_share,
            repeated_deflections: config.repeated_deflections,
        }
    }

    pub fn checkpoints(&self) -> CheckpointSet {
        self.checkpoints
    }

    pub fn count_passed(&self, fullness: f64) -> u32 {
        self.checkpoints.count_passed(fullness)
    }

    /// Chance in [0, 1]; zero when no checkpoint was passed
    pub fn chance_deflected(&self, fullness: f64, passed: u32) -> f64 {
        if passed == 0 {
            return 0.0;
        }
        let fullness = fullness.clamp(0.0, 1.0);
        match self.mode {
            ProbabilityMode::Static => self.checkpoints.highest_passed(fullness),
            ProbabilityMode::Ramped => {
                let exponent = self.ramp_base.powi((passed - 1).min(i32::MAX as u32) as i32);
                fullness.powf(exponent)
            }
        }
    }

    /// Index into `ctx.candidates`: 0 keeps the default hop, anything above
    /// is a deflection
    pub fn decide_deflection<D: DrawSource>(&self, ctx: &RoutingContext, draws: &mut D) -> usize {
        let passed = self.count_passed(ctx.fullness);
        if passed == 0 || ctx.candidates.len() <= 1 {
            return 0;
        }

        let filtered = remove_last_hop(
            &ctx.candidates,
            &ctx.weights,
            ctx.last_deflector,
            self.repeated_deflections,
        );

        let mut chance = self.chance_deflected(ctx.fullness, passed);
        if self.weight_bias {
            chance = (1.0 - self.weight_bias_share) * chance
                + self.weight_bias_share * filtered.raw_mean;
        }
        let r = draws.deflection_draw();
        debug!(
            "Destination {}: fullness {:.4}, passed {}, chance {:.4}, draw {:.4}",
            ctx.target_node_id, ctx.fullness, passed, chance, r
        );

        if r >= chance {
            return 0;
        }
        if !filtered.can_deflect() {
            debug!(
                "Loop filter left no alternative for destination {}",
                ctx.target_node_id
            );
            return 0;
        }

        let pick = draws.choose_weighted(&filtered.weights);
        let index = filtered.to_original(pick + 1).unwrap_or(0);
        debug!(
            "Deflecting to option {} of {} (neighbor {})",
            index,
            ctx.candidates.len() - 1,
            ctx.candidates.get(index).map_or(-1, |h| h.next_node_id)
        );
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FlowKey, Ipv4Meta};
    use crate::time::SimTime;
    use crate::NextHopOption;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    /// Replays fixed draws; weighted choice returns the given picks in order
    struct Scripted {
        draws: VecDeque<f64>,
        picks: VecDeque<usize>,
    }

    impl Scripted {
        fn new(draws: &[f64], picks: &[usize]) -> Self {
            Self {
                draws: draws.iter().copied().collect(),
                picks: picks.iter().copied().collect(),
            }
        }
    }

    impl DrawSource for Scripted {
        fn deflection_draw(&mut self) -> f64 {
            self.draws.pop_front().unwrap()
        }
        fn urgent_draw(&mut self) -> f64 {
            1.0
        }
        fn choose_weighted(&mut self, weights: &[f64]) -> usize {
            let pick = self.picks.pop_front().unwrap_or(0);
            assert!(pick < weights.len());
            pick
        }
    }

    fn model() -> ProbabilityModel {
        ProbabilityModel::from_config(&DeflectionConfig::default())
    }

    fn context(fullness: f64, last_deflector: Option<i32>) -> RoutingContext {
        let ip = Ipv4Meta {
            source: Ipv4Addr::new(10, 0, 0, 1),
            destination: Ipv4Addr::new(10, 0, 0, 2),
            protocol: 17,
            ttl: 64,
        };
        RoutingContext {
            target_node_id: 7,
            ip,
            is_source_ip_probe: false,
            flow: FlowKey {
                source_ip: ip.source,
                destination_ip: ip.destination,
                source_port: 1,
                destination_port: 2,
            },
            last_deflector,
            deflection_count: 0,
            candidates: vec![
                NextHopOption::new(1, 1, 1),
                NextHopOption::new(2, 2, 1),
                NextHopOption::new(3, 3, 1),
            ],
            weights: vec![0.0, 0.5, 0.5],
            fullness,
            now: SimTime::ZERO,
        }
    }

    #[test]
    fn test_scenario_chance_point_nine() {
        let m = model();
        assert_eq!(m.count_passed(0.9), 1);
        assert!((m.chance_deflected(0.9, 1) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_high_draw_keeps_default() {
        let mut draws = Scripted::new(&[0.95], &[]);
        assert_eq!(model().decide_deflection(&context(0.9, None), &mut draws), 0);
    }

    #[test]
    fn test_low_draw_deflects() {
        let mut draws = Scripted::new(&[0.2], &[1]);
        assert_eq!(model().decide_deflection(&context(0.9, None), &mut draws), 2);
    }

    #[test]
    fn test_empty_queue_passes_zero_checkpoint() {
        // only the 0% checkpoint: an empty queue still "passes" but the chance is 0
        let mut draws = Scripted::new(&[0.0], &[]);
        assert_eq!(model().decide_deflection(&context(0.0, None), &mut draws), 0);
    }

    #[test]
    fn test_no_checkpoints_never_draws() {
        let config = DeflectionConfig {
            enabled_checkpoints: CheckpointSet::NEVER,
            ..DeflectionConfig::default()
        };
        let m = ProbabilityModel::from_config(&config);
        let mut draws = Scripted::new(&[], &[]);
        assert_eq!(m.decide_deflection(&context(1.0, None), &mut draws), 0);
    }

    #[test]
    fn test_single_candidate_never_deflects() {
        let mut ctx = context(1.0, None);
        ctx.candidates.truncate(1);
        let mut draws = Scripted::new(&[], &[]);
        assert_eq!(model().decide_deflection(&ctx, &mut draws), 0);
    }

    #[test]
    fn test_loop_filter_maps_index_back() {
        // neighbor 2 deflected this packet; only neighbor 3 (index 2) remains
        let mut draws = Scripted::new(&[0.1], &[0]);
        assert_eq!(model().decide_deflection(&context(0.9, Some(2)), &mut draws), 2);
    }

    #[test]
    fn test_loop_filter_exhausted_falls_back() {
        let mut ctx = context(0.9, Some(2));
        ctx.candidates.truncate(2);
        ctx.weights.truncate(2);
        let mut draws = Scripted::new(&[0.1], &[]);
        assert_eq!(model().decide_deflection(&ctx, &mut draws), 0);
    }

    #[test]
    fn test_ramped_increases_with_checkpoints() {
        let m = model();
        let one = m.chance_deflected(0.5, 1);
        let three = m.chance_deflected(0.5, 3);
        assert!(three > one);
        assert!((three - 0.5_f64.powf(0.81)).abs() < 1e-12);
    }

    #[test]
    fn test_static_mode_step() {
        let config = DeflectionConfig {
            enabled_checkpoints: CheckpointSet::from_thresholds(&[0.0, 0.5, 0.8]).unwrap(),
            probability_mode: ProbabilityMode::Static,
            ..DeflectionConfig::default()
        };
        let m = ProbabilityModel::from_config(&config);
        assert_eq!(m.chance_deflected(0.6, m.count_passed(0.6)), 0.5);
        assert_eq!(m.chance_deflected(0.9, m.count_passed(0.9)), 0.8);
        assert_eq!(m.chance_deflected(0.3, m.count_passed(0.3)), 0.0);
    }

    #[test]
    fn test_weight_bias_blend() {
        let config = DeflectionConfig {
            weight_bias: true,
            ..DeflectionConfig::default()
        };
        let m = ProbabilityModel::from_config(&config);
        // chance 0.9 blended with mean weight 0.5: 0.75 * 0.9 + 0.25 * 0.5 = 0.8
        let mut draws = Scripted::new(&[0.85], &[]);
        assert_eq!(m.decide_deflection(&context(0.9, None), &mut draws), 0);
        let mut draws = Scripted::new(&[0.79], &[0]);
        assert_eq!(m.decide_deflection(&context(0.9, None), &mut draws), 1);
    }
}
