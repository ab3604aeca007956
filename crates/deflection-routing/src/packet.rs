//! Packet-side view of a routing decision
//!
//! The arbiter never parses raw headers. It receives header-level IPv4
//! metadata plus a [`PacketHandle`] that can peek transport ports and carries
//! the [`DeflectionPath`].

use crate::path_tag::DeflectionPath;
use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// IPv4 header fields the arbiter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Meta {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
}

/// Packet collaborator contract
pub trait PacketHandle {
    /// (source port, destination port) of the transport header, if the
    /// packet carries one for `protocol`
    fn peek_ports(&self, protocol: u8) -> Option<(u16, u16)>;

    fn last_deflecting_node(&self) -> Option<NodeId>;

    fn deflection_count(&self) -> u8;

    /// Record `node_id` as the latest deflector
    fn append_deflection(&mut self, node_id: NodeId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum TransportHeader {
    Tcp { source_port: u16, destination_port: u16 },
    Udp { source_port: u16, destination_port: u16 },
}

impl TransportHeader {
    pub fn protocol(&self) -> u8 {
        match self {
            TransportHeader::Tcp { .. } => PROTO_TCP,
            TransportHeader::Udp { .. } => PROTO_UDP,
        }
    }

    pub fn ports(&self) -> (u16, u16) {
        match *self {
            TransportHeader::Tcp {
                source_port,
                destination_port,
            }
            | TransportHeader::Udp {
                source_port,
                destination_port,
            } => (source_port, destination_port),
        }
    }
}

/// In-memory packet used by the replay driver and tests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimPacket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportHeader>,
    /// Absent until the first deflection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<DeflectionPath>,
}

impl SimPacket {
    pub fn new(transport: Option<TransportHeader>) -> Self {
        Self {
            transport,
            path: None,
        }
    }

    pub fn with_path(mut self, path: DeflectionPath) -> Self {
        self.path = Some(path);
        self
    }
}

impl PacketHandle for SimPacket {
    fn peek_ports(&self, protocol: u8) -> Option<(u16, u16)> {
        self.transport
            .filter(|t| t.protocol() == protocol)
            .map(|t| t.ports())
    }

    fn last_deflecting_node(&self) -> Option<NodeId> {
        self.path.as_ref().and_then(|p| p.last_node())
    }

    fn deflection_count(&self) -> u8 {
        self.path.as_ref().map_or(0, |p| p.deflection_count())
    }

    fn append_deflection(&mut self, node_id: NodeId) {
        self.path.get_or_insert_with(DeflectionPath::new).push(node_id);
    }
}

/// Flow identity for caching; protocol is deliberately not part of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
}

impl FlowKey {
    /// Ports come from TCP/UDP headers only, and never for a source-IP probe
    /// (those requests carry no next header)
    pub fn extract<P: PacketHandle + ?Sized>(
        ip: &Ipv4Meta,
        packet: &P,
        is_source_ip_probe: bool,
    ) -> Self {
        let (source_port, destination_port) = if is_source_ip_probe {
            (0, 0)
        } else {
            match ip.protocol {
                PROTO_TCP | PROTO_UDP => packet.peek_ports(ip.protocol).unwrap_or((0, 0)),
                _ => (0, 0),
            }
        };
        Self {
            source_ip: ip.source,
            destination_ip: ip.destination,
            source_port,
            destination_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source_ip, self.source_port, self.destination_ip, self.destination_port
        )
    }
}
