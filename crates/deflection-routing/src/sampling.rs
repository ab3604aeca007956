//! Random draws used by the decision model
//!
//! The arbiter only ever needs three kinds of randomness, so they sit behind
//! [`DrawSource`]. Production code uses [`RandomDraws`]; tests can script the
//! exact sequence of draws.

use crate::config::SamplingParams;
use crate::{DeflectionError, Result};
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::warn;

pub trait DrawSource {
    /// Sample compared against the deflection chance, in [0, 1]
    fn deflection_draw(&mut self) -> f64;

    /// Sample compared against queue fullness on the urgent path, in [0, 1]
    fn urgent_draw(&mut self) -> f64;

    /// Pick an index proportionally to `weights` (non-empty)
    fn choose_weighted(&mut self, weights: &[f64]) -> usize;
}

/// Clipped-normal draws from a process-local generator
#[derive(Debug, Clone)]
pub struct RandomDraws<R = StdRng> {
    rng: R,
    deflection: Normal<f64>,
    urgent: Normal<f64>,
}

impl RandomDraws<StdRng> {
    /// Seeded from `seed`, or from OS entropy when absent
    pub fn from_params(params: &SamplingParams, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rng, params)
    }
}

impl<R: Rng> RandomDraws<R> {
    pub fn with_rng(rng: R, params: &SamplingParams) -> Result<Self> {
        let deflection = Normal::new(params.deflection_mean, params.deflection_sd)
            .map_err(|e| DeflectionError::Sampling(format!("deflection draw: {}", e)))?;
        let urgent = Normal::new(params.urgent_mean, params.urgent_sd)
            .map_err(|e| DeflectionError::Sampling(format!("urgent draw: {}", e)))?;
        Ok(Self {
            rng,
            deflection,
            urgent,
        })
    }
}

impl<R: Rng> DrawSource for RandomDraws<R> {
    fn deflection_draw(&mut self) -> f64 {
        clip_unit(self.deflection.sample(&mut self.rng))
    }

    fn urgent_draw(&mut self) -> f64 {
        clip_unit(self.urgent.sample(&mut self.rng))
    }

    fn choose_weighted(&mut self, weights: &[f64]) -> usize {
        match WeightedIndex::new(weights) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(e) => {
                warn!("Weighted choice over {:?} failed ({}), picking uniformly", weights, e);
                self.rng.gen_range(0..weights.len().max(1))
            }
        }
    }
}

/// Clamp to [0, 1]; NaN maps to 0
pub fn clip_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
