//! Scenario replay
//!
//! A scenario is a list of timed events for a fixed set of nodes. Each node
//! gets its own arbiter and its own table-driven environment; the replay
//! merges forwarding updates, queue samples and packets into one timeline.

use crate::loader::FstateEntry;
use crate::{ReplayError, Result};
use chrono::{DateTime, Utc};
use deflection_routing::packet::{PROTO_TCP, PROTO_UDP};
use deflection_routing::{
    DecisionStats, DeflectionArbiter, DeflectionConfig, DeflectionPath, HopDecision, Ipv4Meta,
    NextHopOption, NodeId, SimPacket, SimTime, StaticEnvironment, TransportHeader,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub num_nodes: usize,
    /// Inline forwarding entries, applied like forwarding-state files
    #[serde(default)]
    pub forwarding: Vec<ForwardingUpdate>,
    #[serde(default)]
    pub ground_station_hops: Vec<GroundStationHop>,
    #[serde(default)]
    pub queues: Vec<QueueSample>,
    #[serde(default)]
    pub packets: Vec<ScenarioPacket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingUpdate {
    #[serde(default)]
    pub time_ms: i64,
    pub node: NodeId,
    pub destination: NodeId,
    pub next_hops: Vec<NextHopOption>,
}

/// `(next_node, own_if)` at `node` is the last hop before a ground station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundStationHop {
    pub node: NodeId,
    pub next_node: NodeId,
    pub own_if: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSample {
    pub time_ms: i64,
    pub node: NodeId,
    pub if_id: i32,
    pub fullness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioPacket {
    pub time_ms: i64,
    /// Node making the decision
    pub node: NodeId,
    pub source: NodeId,
    pub destination: NodeId,
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    #[serde(default)]
    pub source_port: u16,
    #[serde(default)]
    pub destination_port: u16,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    /// Nodes that already deflected this packet, oldest first
    #[serde(default)]
    pub path: Vec<NodeId>,
    #[serde(default)]
    pub source_ip_probe: bool,
}

fn default_protocol() -> u8 {
    PROTO_UDP
}

fn default_ttl() -> u8 {
    64
}

impl ScenarioPacket {
    fn ip(&self) -> Ipv4Meta {
        Ipv4Meta {
            source: self.source_ip,
            destination: self.destination_ip,
            protocol: self.protocol,
            ttl: self.ttl,
        }
    }

    fn to_sim_packet(&self) -> SimPacket {
        let transport = match self.protocol {
            PROTO_TCP => Some(TransportHeader::Tcp {
                source_port: self.source_port,
                destination_port: self.destination_port,
            }),
            PROTO_UDP => Some(TransportHeader::Udp {
                source_port: self.source_port,
                destination_port: self.destination_port,
            }),
            _ => None,
        };
        let packet = SimPacket::new(transport);
        if self.path.is_empty() {
            packet
        } else {
            packet.with_path(DeflectionPath::from_nodes(self.path.clone()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketOutcome {
    /// Position in the scenario's packet list
    pub packet: usize,
    pub time_ms: i64,
    pub node: NodeId,
    pub destination: NodeId,
    pub decision: HopDecision,
    pub next_hop: NextHopOption,
    /// Deflection path after the decision
    pub path: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub generated_at: DateTime<Utc>,
    pub outcomes: Vec<PacketOutcome>,
    pub stats: BTreeMap<NodeId, DecisionStats>,
}

impl ReplayReport {
    pub fn deflected(&self) -> usize {
        self.outcomes.iter().filter(|o| o.decision.is_deflected()).count()
    }
}

enum Event<'a> {
    Forwarding {
        node: NodeId,
        destination: NodeId,
        next_hops: &'a [NextHopOption],
    },
    Queue(&'a QueueSample),
    Packet(usize, &'a ScenarioPacket),
}

impl Event<'_> {
    /// Updates sort before packets at the same timestamp
    fn rank(&self) -> u8 {
        match self {
            Event::Forwarding { .. } | Event::Queue(_) => 0,
            Event::Packet(..) => 1,
        }
    }
}

/// One arbiter and one environment per node
pub struct Replay {
    arbiters: Vec<DeflectionArbiter>,
    envs: Vec<StaticEnvironment>,
}

impl Replay {
    /// Arbiters for nodes `0..num_nodes`; a configured seed is offset by the
    /// node id so nodes draw independent streams
    pub fn new(num_nodes: usize, config: &DeflectionConfig) -> Result<Self> {
        let last = NodeId::try_from(num_nodes)
            .map_err(|_| ReplayError::UnknownNode(NodeId::MAX, num_nodes))?;
        let mut arbiters = Vec::with_capacity(num_nodes);
        for node_id in 0..last {
            let mut node_config = config.clone();
            node_config.seed = config.seed.map(|s| s.wrapping_add(node_id as u64));
            arbiters.push(DeflectionArbiter::new(node_id, num_nodes, node_config)?);
        }
        Ok(Self {
            arbiters,
            envs: vec![StaticEnvironment::new(); num_nodes],
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.arbiters.len()
    }

    pub fn arbiter(&self, node: NodeId) -> Option<&DeflectionArbiter> {
        usize::try_from(node).ok().and_then(|i| self.arbiters.get(i))
    }

    fn slot(&self, node: NodeId) -> Result<usize> {
        usize::try_from(node)
            .ok()
            .filter(|&i| i < self.arbiters.len())
            .ok_or(ReplayError::UnknownNode(node, self.arbiters.len()))
    }

    /// Run every event of `scenario`, with `fstate` files applied at their
    /// timestamps
    pub fn run(
        &mut self,
        scenario: &Scenario,
        fstate: &[(SimTime, Vec<FstateEntry>)],
    ) -> Result<ReplayReport> {
        for hop in &scenario.ground_station_hops {
            let i = self.slot(hop.node)?;
            self.envs[i]
                .ground_station_hops
                .insert((hop.next_node, hop.own_if));
        }

        let mut events: Vec<(SimTime, Event<'_>)> = Vec::new();
        for (t, entries) in fstate {
            for e in entries {
                events.push((
                    *t,
                    Event::Forwarding {
                        node: e.current,
                        destination: e.destination,
                        next_hops: &e.next_hops,
                    },
                ));
            }
        }
        for u in &scenario.forwarding {
            events.push((
                SimTime::from_millis(u.time_ms),
                Event::Forwarding {
                    node: u.node,
                    destination: u.destination,
                    next_hops: &u.next_hops,
                },
            ));
        }
        for q in &scenario.queues {
            events.push((SimTime::from_millis(q.time_ms), Event::Queue(q)));
        }
        for (i, p) in scenario.packets.iter().enumerate() {
            events.push((SimTime::from_millis(p.time_ms), Event::Packet(i, p)));
        }
        events.sort_by_key(|(t, e)| (*t, e.rank()));
        info!("Replaying {} events over {} nodes", events.len(), self.num_nodes());

        let mut outcomes = Vec::with_capacity(scenario.packets.len());
        for (t, event) in events {
            match event {
                Event::Forwarding {
                    node,
                    destination,
                    next_hops,
                } => {
                    // forwarding-state files may list nodes outside the scenario
                    let Ok(i) = self.slot(node) else {
                        debug!("Ignoring forwarding entry for node {}", node);
                        continue;
                    };
                    self.arbiters[i].set_forwarding_table(destination, next_hops.to_vec())?;
                }
                Event::Queue(q) => {
                    let i = self.slot(q.node)?;
                    self.envs[i].set_fullness(q.if_id, q.fullness);
                }
                Event::Packet(index, p) => {
                    let i = self.slot(p.node)?;
                    let env = &mut self.envs[i];
                    env.advance_to(t);
                    let mut packet = p.to_sim_packet();
                    let decision = self.arbiters[i].decide(
                        &*env,
                        p.source,
                        p.destination,
                        &mut packet,
                        &p.ip(),
                        p.source_ip_probe,
                    );
                    outcomes.push(PacketOutcome {
                        packet: index,
                        time_ms: p.time_ms,
                        node: p.node,
                        destination: p.destination,
                        next_hop: decision.next_hop(),
                        decision,
                        path: packet.path.map(|d| d.nodes().to_vec()).unwrap_or_default(),
                    });
                }
            }
        }

        let stats = self
            .arbiters
            .iter()
            .filter(|a| a.stats().decisions > 0)
            .map(|a| (a.node_id(), a.stats().clone()))
            .collect();

        Ok(ReplayReport {
            generated_at: Utc::now(),
            outcomes,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(time_ms: i64, ttl: u8, path: Vec<NodeId>) -> ScenarioPacket {
        ScenarioPacket {
            time_ms,
            node: 0,
            source: 0,
            destination: 3,
            source_ip: Ipv4Addr::new(10, 0, 0, 1),
            destination_ip: Ipv4Addr::new(10, 0, 3, 1),
            protocol: PROTO_UDP,
            source_port: 9000,
            destination_port: 9000,
            ttl,
            path,
            source_ip_probe: false,
        }
    }

    fn scenario(packets: Vec<ScenarioPacket>) -> Scenario {
        Scenario {
            num_nodes: 4,
            forwarding: vec![ForwardingUpdate {
                time_ms: 0,
                node: 0,
                destination: 3,
                next_hops: vec![
                    NextHopOption::new(1, 1, 0),
                    NextHopOption::new(2, 2, 0),
                ],
            }],
            ground_station_hops: vec![GroundStationHop {
                node: 0,
                next_node: 1,
                own_if: 1,
            }],
            queues: vec![QueueSample {
                time_ms: 0,
                node: 0,
                if_id: 1,
                fullness: 0.0,
            }],
            packets,
        }
    }

    fn seeded() -> DeflectionConfig {
        DeflectionConfig {
            seed: Some(7),
            ..DeflectionConfig::default()
        }
    }

    #[test]
    fn test_empty_queue_forwards() {
        let mut replay = Replay::new(4, &seeded()).unwrap();
        let report = replay
            .run(&scenario(vec![packet(1, 64, vec![]), packet(2, 64, vec![])]), &[])
            .unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.next_hop == NextHopOption::new(1, 1, 0)));
        assert_eq!(report.stats[&0].decisions, 2);
    }

    #[test]
    fn test_unknown_destination_no_route() {
        let mut s = scenario(vec![packet(1, 64, vec![])]);
        s.packets[0].destination = 2;
        let report = Replay::new(4, &seeded()).unwrap().run(&s, &[]).unwrap();
        assert_eq!(report.outcomes[0].decision, HopDecision::NoRoute);
    }

    #[test]
    fn test_ttl_one_dropped() {
        let report = Replay::new(4, &seeded())
            .unwrap()
            .run(&scenario(vec![packet(1, 1, vec![])]), &[])
            .unwrap();
        assert_eq!(report.outcomes[0].next_hop, NextHopOption::DROP);
    }

    #[test]
    fn test_fstate_applied_at_timestamp() {
        let fstate = vec![(
            SimTime::from_millis(5),
            vec![FstateEntry {
                current: 0,
                destination: 3,
                next_hops: vec![NextHopOption::new(2, 2, 0)],
            }],
        )];
        let report = Replay::new(4, &seeded())
            .unwrap()
            .run(&scenario(vec![packet(1, 64, vec![]), packet(5, 64, vec![])]), &fstate)
            .unwrap();
        assert_eq!(report.outcomes[0].next_hop, NextHopOption::new(1, 1, 0));
        assert_eq!(report.outcomes[1].next_hop, NextHopOption::new(2, 2, 0));
    }

    #[test]
    fn test_fstate_other_nodes_ignored() {
        let fstate = vec![(
            SimTime::ZERO,
            vec![FstateEntry {
                current: 40,
                destination: 3,
                next_hops: vec![NextHopOption::new(2, 2, 0)],
            }],
        )];
        let report = Replay::new(4, &seeded())
            .unwrap()
            .run(&scenario(vec![packet(1, 64, vec![])]), &fstate)
            .unwrap();
        assert_eq!(report.outcomes.len(), 1);
    }

    #[test]
    fn test_unknown_packet_node_rejected() {
        let mut s = scenario(vec![packet(1, 64, vec![])]);
        s.packets[0].node = 9;
        let err = Replay::new(4, &seeded()).unwrap().run(&s, &[]).unwrap_err();
        assert!(matches!(err, ReplayError::UnknownNode(9, 4)));
    }

    #[test]
    fn test_negative_fstate_hop_rejected() {
        let mut s = scenario(vec![]);
        s.forwarding[0].next_hops[0] = NextHopOption::INVALID;
        let err = Replay::new(4, &seeded()).unwrap().run(&s, &[]).unwrap_err();
        assert!(matches!(err, ReplayError::Engine(_)));
    }

    #[test]
    fn test_scenario_json_defaults() {
        let json = r#"{
            "num_nodes": 2,
            "packets": [
                {"time_ms": 0, "node": 0, "source": 0, "destination": 1,
                 "source_ip": "10.0.0.1", "destination_ip": "10.0.1.1"}
            ]
        }"#;
        let s: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(s.packets[0].protocol, PROTO_UDP);
        assert_eq!(s.packets[0].ttl, 64);
        assert!(s.queues.is_empty());
    }
}
