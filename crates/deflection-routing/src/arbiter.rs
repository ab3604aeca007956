//! Deflection arbiter
//!
//! One [`DeflectionArbiter`] per simulated node. It owns the node's
//! forwarding table, flow cache, neighbor weights and random generator, and
//! is invoked once per packet from the simulator's event loop. Nothing is
//! shared between arbiters, so no locking is involved; a multi-threaded
//! driver must keep each arbiter on one thread at a time.

use crate::config::DeflectionConfig;
use crate::context::RoutingContext;
use crate::environment::NodeEnvironment;
use crate::flow_cache::{CacheEntry, CacheProbe, FlowCache, StaleReason, DROP_INDEX};
use crate::forwarding::ForwardingTable;
use crate::packet::{FlowKey, Ipv4Meta, PacketHandle};
use crate::probability::ProbabilityModel;
use crate::sampling::{clip_unit, DrawSource, RandomDraws};
use crate::stats::DecisionStats;
use crate::weights::NeighborWeightTable;
use crate::{HopDecision, NextHopOption, NodeId, Result};
use tracing::{debug, error, info, warn};

pub struct DeflectionArbiter<D: DrawSource = RandomDraws> {
    node_id: NodeId,
    config: DeflectionConfig,
    forwarding: ForwardingTable,
    model: ProbabilityModel,
    cache: FlowCache,
    weights: NeighborWeightTable,
    draws: D,
    stats: DecisionStats,
}

impl DeflectionArbiter<RandomDraws> {
    /// Arbiter for `node_id` in a topology of `num_nodes` nodes, with an
    /// empty forwarding table
    pub fn new(node_id: NodeId, num_nodes: usize, config: DeflectionConfig) -> Result<Self> {
        config.validate()?;
        let draws = RandomDraws::from_params(&config.sampling, config.seed)?;
        Self::with_draws(node_id, num_nodes, config, draws)
    }
}

impl<D: DrawSource> DeflectionArbiter<D> {
    pub fn with_draws(
        node_id: NodeId,
        num_nodes: usize,
        config: DeflectionConfig,
        draws: D,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            node_id,
            model: ProbabilityModel::from_config(&config),
            cache: FlowCache::new(&config.thresholds),
            weights: NeighborWeightTable::new(&config.thresholds),
            forwarding: ForwardingTable::new(num_nodes),
            config,
            draws,
            stats: DecisionStats::default(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &DeflectionConfig {
        &self.config
    }

    pub fn stats(&self) -> &DecisionStats {
        &self.stats
    }

    pub fn forwarding_table(&self) -> &ForwardingTable {
        &self.forwarding
    }

    pub fn flow_cache(&self) -> &FlowCache {
        &self.cache
    }

    pub fn neighbor_weights(&self) -> &NeighborWeightTable {
        &self.weights
    }

    /// Replace the candidate list for `destination`; rejects negative ids
    pub fn set_forwarding_table(
        &mut self,
        destination: NodeId,
        next_hops: Vec<NextHopOption>,
    ) -> Result<()> {
        let count = next_hops.len();
        self.forwarding.set(destination, next_hops)?;
        info!(
            "Node {}: forwarding entry for {} replaced ({} options)",
            self.node_id, destination, count
        );
        Ok(())
    }

    /// Pick the next hop for one packet.
    ///
    /// Only packets whose default hop is the final one before a ground
    /// station, and that have alternatives, go through the deflection
    /// pipeline; everything else takes the default hop unchanged.
    pub fn decide<E, P>(
        &mut self,
        env: &E,
        source_id: NodeId,
        target_id: NodeId,
        packet: &mut P,
        ip: &Ipv4Meta,
        is_source_ip_probe: bool,
    ) -> HopDecision
    where
        E: NodeEnvironment + ?Sized,
        P: PacketHandle + ?Sized,
    {
        self.stats.decisions += 1;

        let next_hops = self.forwarding.get(target_id);
        let Some(&default_hop) = next_hops.first() else {
            debug!("Node {}: no next hops towards {}", self.node_id, target_id);
            self.stats.no_route += 1;
            return HopDecision::NoRoute;
        };

        if !default_hop.is_valid() {
            error!(
                "Node {}: default hop {} towards {} is malformed",
                self.node_id, default_hop, target_id
            );
            self.stats.unroutable += 1;
            return HopDecision::Unroutable { hop: default_hop };
        }

        let deflectable = next_hops.len() > 1
            && env.is_final_hop_to_ground_station(default_hop.next_node_id, default_hop.own_if_id);
        if !deflectable {
            self.stats.forwarded += 1;
            return HopDecision::Forward { hop: default_hop };
        }

        self.stats.deflectable += 1;
        let candidates = next_hops.to_vec();
        let now = env.now();
        let last_deflector = packet.last_deflecting_node();
        debug!(
            "Node {}: deciding {} -> {} via {} ({} options, last deflector {:?})",
            self.node_id,
            source_id,
            target_id,
            default_hop,
            candidates.len(),
            last_deflector
        );

        let weights = if self.config.use_weights {
            self.weights.handle_weights(target_id, &candidates, now);
            if self.weights.check_bump_weights(target_id, last_deflector) {
                self.stats.loop_penalties += 1;
            }
            self.weights.candidate_weights(target_id, &candidates)
        } else {
            Vec::new()
        };

        let ctx = RoutingContext {
            target_node_id: target_id,
            ip: *ip,
            is_source_ip_probe,
            flow: FlowKey::extract(ip, &*packet, is_source_ip_probe),
            last_deflector,
            deflection_count: packet.deflection_count(),
            candidates,
            weights,
            fullness: clip_unit(env.queue_fullness(default_hop.own_if_id)),
            now,
        };

        let index = self.cache_decide_deflection(&ctx);
        match index {
            DROP_INDEX => {
                self.stats.dropped += 1;
                HopDecision::Drop
            }
            0 => {
                self.stats.forwarded += 1;
                HopDecision::Forward { hop: default_hop }
            }
            i => {
                // in range: cache_decide_deflection coerces anything else to 0
                let index = i as usize;
                let hop = ctx.candidates[index];
                packet.append_deflection(self.node_id);
                self.stats.deflected += 1;
                debug!("Node {}: deflected towards {} via {}", self.node_id, target_id, hop);
                HopDecision::Deflect { hop, index }
            }
        }
    }

    /// Cached (or fresh) index for the context's flow, guaranteed to be
    /// `-1` or a valid candidate index
    pub fn cache_decide_deflection(&mut self, ctx: &RoutingContext) -> i32 {
        if self.config.use_cache && self.cache.maybe_refresh(ctx.now) {
            self.stats.cache_clears += 1;
        }
        let index = self.get_cache_value(ctx);
        if index == DROP_INDEX || (index >= 0 && (index as usize) < ctx.candidates.len()) {
            index
        } else {
            warn!(
                "Node {}: index {} out of range for {} candidates, using default",
                self.node_id,
                index,
                ctx.candidates.len()
            );
            self.stats.out_of_range += 1;
            0
        }
    }

    fn get_cache_value(&mut self, ctx: &RoutingContext) -> i32 {
        let probe = CacheProbe {
            now: ctx.now,
            ttl: ctx.ttl(),
            fullness: ctx.fullness,
        };

        if self.is_urgent(ctx) {
            self.stats.urgent += 1;
            let index = self.urgent_decision(ctx);
            if self.config.use_cache {
                self.cache.record_urgent(ctx.flow, index, &probe);
            }
            return index;
        }

        if !self.config.use_cache {
            return self.model.decide_deflection(ctx, &mut self.draws) as i32;
        }

        let repeated = self.config.repeated_deflections;
        let reject = |entry: &CacheEntry| {
            (!repeated && returns_to_last_deflector(ctx, entry.index)).then_some(StaleReason::LoopBack)
        };
        let model = &self.model;
        let draws = &mut self.draws;
        let (index, lookup) = self.cache.resolve_with(ctx.flow, probe, reject, || {
            model.decide_deflection(ctx, draws) as i32
        });
        self.stats.record_lookup(lookup);
        index
    }

    /// Low TTL or too many deflections: no further deflection is safe
    fn is_urgent(&self, ctx: &RoutingContext) -> bool {
        ctx.ttl() < self.config.thresholds.urgent_ttl
            || ctx.deflection_count > self.config.thresholds.max_deflections
    }

    /// Forward (0) unless the packet is about to expire or the default
    /// queue is at least as full as the urgent draw, then drop (-1)
    fn urgent_decision(&mut self, ctx: &RoutingContext) -> i32 {
        if ctx.ttl() <= 1 {
            return DROP_INDEX;
        }
        let sample = self.draws.urgent_draw();
        if ctx.fullness >= sample {
            DROP_INDEX
        } else {
            0
        }
    }

    pub fn debug_dump_forwarding_state(&self) -> String {
        self.forwarding.render(self.node_id)
    }

    pub fn debug_dump_cache(&self) -> String {
        format!(
            "Flow cache of node {} ({} entries)\n{}Neighbor weights of node {} ({} destinations)\n{}Stats: {}\n",
            self.node_id,
            self.cache.len(),
            self.cache.render(),
            self.node_id,
            self.weights.len(),
            self.weights.render(),
            self.stats
        )
    }

    /// Drop all cached flow decisions
    pub fn clear_cache(&mut self) {
        info!("Node {}: flow cache cleared ({} entries)", self.node_id, self.cache.len());
        self.cache.clear();
        self.stats.cache_clears += 1;
    }
}

/// `index` deflects onto the neighbor that last deflected this packet
fn returns_to_last_deflector(ctx: &RoutingContext, index: i32) -> bool {
    index > 0
        && ctx
            .candidates
            .get(index as usize)
            .zip(ctx.last_deflector)
            .map_or(false, |(hop, last)| hop.next_node_id == last)
}
