//! Reachability between nodes.
//!
//! The wireless medium is modelled by a propagation trait that only answers
//! whether one position can hear another. Tunnel members are always adjacent
//! over their private link.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::link::LinkKind;
use crate::position::Position;
use crate::topology::{LinkId, NodeId, Topology};

pub trait Propagation {
    fn reaches(&self, from: Position, to: Position) -> bool;
}

/// Fixed-range disc: two radios hear each other iff they are within `range`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePropagation {
    pub range: f64,
}

impl RangePropagation {
    pub fn new(range: f64) -> Self {
        Self { range }
    }
}

impl Propagation for RangePropagation {
    fn reaches(&self, from: Position, to: Position) -> bool {
        from.distance(&to) <= self.range
    }
}

/// A one-hop neighbour as seen from a particular node.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjacency {
    pub neighbor: NodeId,
    pub link: LinkId,
    pub kind: LinkKind,
    /// Address of the local interface used to reach the neighbour.
    pub local: Ipv4Addr,
    /// The neighbour's address on the same link.
    pub remote: Ipv4Addr,
    /// One-way latency for a packet of the probed size.
    pub latency: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct NeighborGraph {
    adjacency: Vec<Vec<Adjacency>>,
}

impl NeighborGraph {
    /// Discovers every one-hop adjacency for packets of `probe_bytes`.
    pub fn discover(topology: &Topology, medium: &dyn Propagation, probe_bytes: u32) -> Self {
        let mut adjacency = vec![Vec::new(); topology.nodes().len()];
        for link in topology.links() {
            let latency = link.profile().hop_latency(probe_bytes);
            for &a in link.members() {
                for &b in link.members() {
                    if a == b {
                        continue;
                    }
                    let (Some(na), Some(nb)) = (topology.node(a), topology.node(b)) else {
                        continue;
                    };
                    if link.kind() == LinkKind::ContestedWireless
                        && !medium.reaches(na.position(), nb.position())
                    {
                        continue;
                    }
                    let local = na.interfaces().iter().find(|i| i.link == link.id());
                    let remote = nb.interfaces().iter().find(|i| i.link == link.id());
                    if let (Some(local), Some(remote)) = (local, remote) {
                        adjacency[a].push(Adjacency {
                            neighbor: b,
                            link: link.id(),
                            kind: link.kind(),
                            local: local.address,
                            remote: remote.address,
                            latency,
                        });
                    }
                }
            }
        }
        for list in &mut adjacency {
            list.sort_by_key(|adj| (adj.neighbor, adj.kind));
        }
        Self { adjacency }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn neighbors(&self, node: NodeId) -> &[Adjacency] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn are_neighbors(&self, a: NodeId, b: NodeId) -> bool {
        self.neighbors(a).iter().any(|adj| adj.neighbor == b)
    }

    /// Cheapest adjacency from `a` to `b`, preferring lower latency.
    pub fn best_hop(&self, a: NodeId, b: NodeId) -> Option<&Adjacency> {
        self.neighbors(a)
            .iter()
            .filter(|adj| adj.neighbor == b)
            .min_by_key(|adj| adj.latency)
    }
}
