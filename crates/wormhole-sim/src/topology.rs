use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;
use tracing::{debug, info};

use crate::addressing::{AddressAllocator, AddressPlan};
use crate::config::TopologyConfig;
use crate::error::{Result, SimError};
use crate::link::{LinkKind, LinkProfile};
use crate::position::{Position, PositionModel};
use crate::scenario::Scenario;
use crate::tunnel::TunnelInjector;

pub type NodeId = usize;
pub type LinkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ordinary,
    TunnelEndpoint,
}

/// A node's attachment to one link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub kind: LinkKind,
    pub link: LinkId,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    id: NodeId,
    role: Role,
    label: String,
    position: Position,
    interfaces: Vec<Interface>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Display label: `N<i>` for ordinary nodes, `W1`/`W2` for endpoints.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface(&self, kind: LinkKind) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.kind == kind)
    }

    /// The node's address on the shared wireless medium.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.interface(LinkKind::ContestedWireless).map(|i| i.address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    id: LinkId,
    kind: LinkKind,
    members: Vec<NodeId>,
    profile: LinkProfile,
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn profile(&self) -> &LinkProfile {
        &self.profile
    }

    pub(crate) fn set_profile(&mut self, profile: LinkProfile) {
        self.profile = profile;
    }
}

/// The complete node/link/address graph of one run.
///
/// Built once before the event loop and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    scenario: Scenario,
    nodes: Vec<Node>,
    links: Vec<Link>,
    addressing: AddressPlan,
}

impl Topology {
    /// Places nodes, wires both link kinds, assigns addresses and injects
    /// the tunnel parameters.
    pub fn build(config: &TopologyConfig) -> Result<Self> {
        config.validate()?;
        let model = PositionModel::new(config)?;
        let addressing = AddressPlan::new(config.addressing.wireless, config.addressing.tunnel)?;
        let count = config.node_count();
        let endpoints = config.tunnel_endpoints();

        let mut nodes = Vec::with_capacity(count);
        for id in 0..count {
            let position = model.position(id).map_err(|e| {
                SimError::config(format!("fixed node {id} has no placement: {e}"))
            })?;
            let (role, label) = if let Some(k) = endpoints.iter().position(|&e| e == id) {
                (Role::TunnelEndpoint, format!("W{}", k + 1))
            } else {
                (Role::Ordinary, format!("N{id}"))
            };
            nodes.push(Node {
                id,
                role,
                label,
                position,
                interfaces: Vec::new(),
            });
        }

        let mut topology = Topology {
            scenario: config.scenario,
            nodes,
            links: Vec::new(),
            addressing,
        };

        let everyone: Vec<NodeId> = (0..count).collect();
        topology.attach_medium(&everyone, config.wireless.clone())?;
        topology.attach_tunnel(endpoints[0], endpoints[1])?;
        TunnelInjector::new(config).inject(&mut topology)?;
        topology.verify()?;

        info!(
            scenario = %config.scenario,
            nodes = count,
            wireless = %addressing.wireless,
            tunnel = %addressing.tunnel,
            "topology built"
        );
        Ok(topology)
    }

    /// Attaches every listed node to one shared contested medium.
    fn attach_medium(&mut self, members: &[NodeId], profile: LinkProfile) -> Result<LinkId> {
        let link = self.links.len();
        let mut alloc = AddressAllocator::new(self.addressing.wireless);
        for &id in members {
            let address = alloc.allocate()?;
            self.node_mut(id)?.interfaces.push(Interface {
                kind: LinkKind::ContestedWireless,
                link,
                address,
            });
            debug!(node = id, %address, "wireless interface attached");
        }
        self.links.push(Link {
            id: link,
            kind: LinkKind::ContestedWireless,
            members: members.to_vec(),
            profile,
        });
        Ok(link)
    }

    /// Creates the point-to-point tunnel. Only tunnel endpoints may join it.
    ///
    /// The link starts without usable parameters; the tunnel injector
    /// configures it.
    fn attach_tunnel(&mut self, a: NodeId, b: NodeId) -> Result<LinkId> {
        for id in [a, b] {
            let node = self.node(id).ok_or_else(|| {
                SimError::config(format!("tunnel endpoint {id} does not exist"))
            })?;
            if node.role != Role::TunnelEndpoint {
                return Err(SimError::config(format!(
                    "node {id} ({}) is not a tunnel endpoint and cannot join the tunnel",
                    node.label
                )));
            }
        }
        if a == b {
            return Err(SimError::config("tunnel endpoints must be distinct"));
        }

        let link = self.links.len();
        let mut alloc = AddressAllocator::new(self.addressing.tunnel);
        for id in [a, b] {
            let address = alloc.allocate()?;
            self.node_mut(id)?.interfaces.push(Interface {
                kind: LinkKind::PrivilegedTunnel,
                link,
                address,
            });
            debug!(node = id, %address, "tunnel interface attached");
        }
        self.links.push(Link {
            id: link,
            kind: LinkKind::PrivilegedTunnel,
            members: vec![a, b],
            profile: LinkProfile {
                rate_kbit: 0,
                delay_ms: 0.0,
                loss_percent: 100.0,
                tx_power_dbm: None,
            },
        });
        Ok(link)
    }

    /// Checks the interface and address invariants of a built topology.
    pub fn verify(&self) -> Result<()> {
        let mut tunnel_members = 0;
        for node in &self.nodes {
            let wireless = node
                .interfaces
                .iter()
                .filter(|i| i.kind == LinkKind::ContestedWireless)
                .count();
            let tunnel = node
                .interfaces
                .iter()
                .filter(|i| i.kind == LinkKind::PrivilegedTunnel)
                .count();
            if wireless != 1 {
                return Err(SimError::config(format!(
                    "node {} has {wireless} wireless interfaces, expected 1",
                    node.id
                )));
            }
            match (node.role, tunnel) {
                (Role::TunnelEndpoint, 1) => tunnel_members += 1,
                (Role::Ordinary, 0) => {}
                (role, n) => {
                    return Err(SimError::config(format!(
                        "node {} with role {role:?} has {n} tunnel interfaces",
                        node.id
                    )))
                }
            }
            for iface in &node.interfaces {
                let subnet = match iface.kind {
                    LinkKind::ContestedWireless => self.addressing.wireless,
                    LinkKind::PrivilegedTunnel => self.addressing.tunnel,
                };
                if !subnet.contains(iface.address) {
                    return Err(SimError::config(format!(
                        "{} interface {} of node {} is outside {subnet}",
                        iface.kind, iface.address, node.id
                    )));
                }
            }
        }
        if tunnel_members != 2 {
            return Err(SimError::config(format!(
                "expected exactly 2 tunnel endpoints, found {tunnel_members}"
            )));
        }
        Ok(())
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn addressing(&self) -> AddressPlan {
        self.addressing
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let count = self.nodes.len();
        self.nodes
            .get_mut(id)
            .ok_or(SimError::OutOfRangeIndex { index: id, count })
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(id)
    }

    pub fn links_of(&self, kind: LinkKind) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.kind == kind)
    }

    pub fn interface_count(&self, kind: LinkKind) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.interfaces.iter())
            .filter(|i| i.kind == kind)
            .count()
    }

    /// All addresses assigned on links of `kind`, in node order.
    pub fn addresses(&self, kind: LinkKind) -> Vec<Ipv4Addr> {
        self.nodes
            .iter()
            .flat_map(|n| n.interfaces.iter())
            .filter(|i| i.kind == kind)
            .map(|i| i.address)
            .collect()
    }

    /// Resolves an interface address back to its node.
    pub fn node_by_address(&self, addr: Ipv4Addr) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.interfaces.iter().any(|i| i.address == addr))
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario {} ({})", self.scenario.id(), self.scenario)?;
        for node in &self.nodes {
            let role = match node.role {
                Role::Ordinary => "ordinary",
                Role::TunnelEndpoint => "endpoint",
            };
            let position = node.position.to_string();
            write!(f, "{:>4} {:<15} {role}", node.label, position)?;
            for iface in &node.interfaces {
                write!(f, " {}={}", iface.kind, iface.address)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn build(scenario: Scenario) -> Topology {
        Topology::build(&TopologyConfig::default().with_scenario(scenario)).unwrap()
    }

    #[test]
    fn interface_counts_per_kind() {
        for scenario in Scenario::ALL {
            let topo = build(scenario);
            assert_eq!(topo.nodes().len(), 11);
            assert_eq!(topo.interface_count(LinkKind::ContestedWireless), 11);
            assert_eq!(topo.interface_count(LinkKind::PrivilegedTunnel), 2);
            assert_eq!(topo.links_of(LinkKind::ContestedWireless).count(), 1);
            assert_eq!(topo.links_of(LinkKind::PrivilegedTunnel).count(), 1);
        }
    }

    #[test]
    fn subnets_are_disjoint_and_tunnel_is_private() {
        let topo = build(Scenario::InRange);
        let wireless: HashSet<_> = topo.addresses(LinkKind::ContestedWireless).into_iter().collect();
        let tunnel: HashSet<_> = topo.addresses(LinkKind::PrivilegedTunnel).into_iter().collect();
        assert_eq!(wireless.len(), 11);
        assert_eq!(tunnel.len(), 2);
        assert!(wireless.is_disjoint(&tunnel));

        let tunnel_owners: Vec<NodeId> = topo
            .nodes()
            .iter()
            .filter(|n| n.interface(LinkKind::PrivilegedTunnel).is_some())
            .map(|n| n.id())
            .collect();
        assert_eq!(tunnel_owners, vec![9, 10]);
        for node in topo.nodes() {
            assert_eq!(node.role() == Role::TunnelEndpoint, node.id() >= 9);
        }
    }

    #[test]
    fn addresses_follow_node_order() {
        let topo = build(Scenario::InRange);
        assert_eq!(topo.node(0).unwrap().primary_address(), Some(Ipv4Addr::new(10, 1, 1, 1)));
        assert_eq!(topo.node(10).unwrap().primary_address(), Some(Ipv4Addr::new(10, 1, 1, 11)));
        let w2 = topo.node(10).unwrap();
        assert_eq!(w2.label(), "W2");
        assert_eq!(
            w2.interface(LinkKind::PrivilegedTunnel).unwrap().address,
            Ipv4Addr::new(10, 1, 2, 2)
        );
        assert_eq!(topo.node_by_address(Ipv4Addr::new(10, 1, 2, 1)).unwrap().id(), 9);
    }

    #[test]
    fn build_is_a_pure_function_of_config() {
        for scenario in Scenario::ALL {
            assert_eq!(build(scenario), build(scenario));
        }
    }

    #[test]
    fn ordinary_node_cannot_join_tunnel() {
        let mut topo = build(Scenario::InRange);
        let err = topo.attach_tunnel(0, 9).unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("not a tunnel endpoint")));
    }

    #[test]
    fn exhausted_subnet_is_a_configuration_error() {
        let toml = r#"
            [addressing]
            wireless = "10.1.1.0/29"
        "#;
        let cfg = TopologyConfig::from_toml_str(toml).unwrap();
        let err = Topology::build(&cfg).unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn oversized_node_count_fails_before_allocating() {
        let mut cfg = TopologyConfig::default().with_scenario(Scenario::OutOfRange);
        cfg.ordinary_nodes = 1 << 40;
        let err = Topology::build(&cfg).unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("exhausted")));
    }

    #[test]
    fn tunnel_is_configured_by_injector() {
        let topo = build(Scenario::OutOfRange);
        let tunnel = topo.links_of(LinkKind::PrivilegedTunnel).next().unwrap();
        assert_eq!(tunnel.members(), &[9, 10]);
        assert_eq!(tunnel.profile(), &LinkProfile::tunnel_default());
    }
}
