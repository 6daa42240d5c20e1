//! On-demand hop-count routing.
//!
//! Routes are discovered the first time a node needs one, AODV style: the
//! discovered path installs a forward route at every hop toward the
//! destination and a reverse route toward the originator. Path cost is hop
//! count, ties broken by accumulated link latency and then by node index.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::radio::NeighborGraph;
use crate::sim::SimTime;
use crate::topology::{NodeId, Topology};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    /// Address of the next hop on the outgoing link.
    pub gateway: Ipv4Addr,
    /// Local interface address the packet leaves through.
    pub interface: Ipv4Addr,
    pub next_hop: NodeId,
    pub hops: u32,
    pub installed_at: SimTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    node: NodeId,
    entries: BTreeMap<Ipv4Addr, RouteEntry>,
}

impl RoutingTable {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            entries: BTreeMap::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn lookup(&self, destination: Ipv4Addr) -> Option<&RouteEntry> {
        self.entries.get(&destination)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installs `entry` unless an existing route is strictly shorter.
    pub fn install(&mut self, entry: RouteEntry) {
        match self.entries.get(&entry.destination) {
            Some(existing) if existing.hops < entry.hops => {}
            _ => {
                self.entries.insert(entry.destination, entry);
            }
        }
    }

    /// Text dump in the layout of the routing-table artifact.
    pub fn render(&self, at: SimTime) -> String {
        let mut out = format!("Node: {}; Time: {}, Hop-count routing table\n", self.node, at);
        out.push_str(&format!(
            "{:<16} {:<16} {:<16} {:<5} {}\n",
            "Destination", "Gateway", "Interface", "Flag", "Hops"
        ));
        for e in self.entries.values() {
            out.push_str(&format!(
                "{:<16} {:<16} {:<16} {:<5} {}\n",
                e.destination.to_string(),
                e.gateway.to_string(),
                e.interface.to_string(),
                "UP",
                e.hops
            ));
        }
        out
    }
}

/// The routing collaborator as seen by the traffic driver.
pub trait RoutingProtocol {
    /// Hop-by-hop path from `from` to `to`, discovering one if no usable
    /// route is installed. `None` when `to` is unreachable.
    fn route(&mut self, from: NodeId, to: NodeId, now: SimTime) -> Option<Vec<NodeId>>;

    /// Path currently installed in the tables, without discovery.
    fn installed_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>>;

    fn tables(&self) -> &[RoutingTable];
}

pub struct OnDemandRouting {
    graph: NeighborGraph,
    addresses: Vec<Ipv4Addr>,
    tables: Vec<RoutingTable>,
}

impl OnDemandRouting {
    pub fn new(topology: &Topology, graph: NeighborGraph) -> Self {
        let addresses = topology
            .nodes()
            .iter()
            .map(|n| n.primary_address().unwrap_or(Ipv4Addr::UNSPECIFIED))
            .collect();
        let tables = (0..topology.nodes().len()).map(RoutingTable::new).collect();
        Self {
            graph,
            addresses,
            tables,
        }
    }

    pub fn graph(&self) -> &NeighborGraph {
        &self.graph
    }

    pub fn table(&self, node: NodeId) -> Option<&RoutingTable> {
        self.tables.get(node)
    }

    /// Next hop installed at `from` for traffic to `to`.
    pub fn next_hop(&self, from: NodeId, to: NodeId) -> Option<NodeId> {
        let dest = *self.addresses.get(to)?;
        self.tables.get(from)?.lookup(dest).map(|e| e.next_hop)
    }

    /// Least-cost path by (hops, latency, node index).
    fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let n = self.graph.node_count();
        if from >= n || to >= n {
            return None;
        }
        let mut best: Vec<Option<(u32, Duration)>> = vec![None; n];
        let mut prev: Vec<Option<NodeId>> = vec![None; n];
        let mut heap = BinaryHeap::new();
        best[from] = Some((0, Duration::ZERO));
        heap.push(Reverse((0u32, Duration::ZERO, from)));

        while let Some(Reverse((hops, latency, node))) = heap.pop() {
            if best[node] != Some((hops, latency)) {
                continue;
            }
            if node == to {
                break;
            }
            for adj in self.graph.neighbors(node) {
                let cand = (hops + 1, latency.saturating_add(adj.latency));
                if best[adj.neighbor].map_or(true, |cur| cand < cur) {
                    best[adj.neighbor] = Some(cand);
                    prev[adj.neighbor] = Some(node);
                    heap.push(Reverse((cand.0, cand.1, adj.neighbor)));
                }
            }
        }

        best[to]?;
        let mut path = vec![to];
        let mut cur = to;
        while cur != from {
            cur = prev[cur]?;
            path.push(cur);
        }
        path.reverse();
        Some(path)
    }

    fn install_path(&mut self, path: &[NodeId], now: SimTime) {
        let (Some(&origin), Some(&target)) = (path.first(), path.last()) else {
            return;
        };
        let last = path.len() - 1;
        for (i, pair) in path.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            let (Some(fwd), Some(rev)) = (self.graph.best_hop(a, b), self.graph.best_hop(b, a))
            else {
                continue;
            };
            let (fwd, rev) = (fwd.clone(), rev.clone());
            let forward = [(target, (last - i) as u32), (b, 1)];
            for (dest, hops) in forward {
                self.tables[a].install(RouteEntry {
                    destination: self.addresses[dest],
                    gateway: fwd.remote,
                    interface: fwd.local,
                    next_hop: b,
                    hops,
                    installed_at: now,
                });
            }
            let reverse = [(origin, (i + 1) as u32), (a, 1)];
            for (dest, hops) in reverse {
                self.tables[b].install(RouteEntry {
                    destination: self.addresses[dest],
                    gateway: rev.remote,
                    interface: rev.local,
                    next_hop: a,
                    hops,
                    installed_at: now,
                });
            }
        }
    }
}

impl RoutingProtocol for OnDemandRouting {
    fn route(&mut self, from: NodeId, to: NodeId, now: SimTime) -> Option<Vec<NodeId>> {
        if let Some(path) = self.installed_path(from, to) {
            return Some(path);
        }
        match self.shortest_path(from, to) {
            Some(path) => {
                info!(from, to, ?path, at = %now, "route discovered");
                self.install_path(&path, now);
                Some(path)
            }
            None => {
                debug!(from, to, at = %now, "destination unreachable");
                None
            }
        }
    }

    fn installed_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut path = vec![from];
        let mut cur = from;
        while cur != to {
            let next = self.next_hop(cur, to)?;
            if path.len() > self.tables.len() || !self.graph.are_neighbors(cur, next) {
                return None;
            }
            path.push(next);
            cur = next;
        }
        Some(path)
    }

    fn tables(&self) -> &[RoutingTable] {
        &self.tables
    }
}
