//! Observation sinks: routing snapshots, the position timeline, route
//! samples and per-interface packet traces.
//!
//! The driver talks to an [`Observer`]. [`Recorder`] keeps everything in
//! memory; [`ArtifactWriter`] renders the same stream into files named by
//! scenario id.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::TopologyConfig;
use crate::error::Result;
use crate::link::LinkKind;
use crate::position::Position;
use crate::routing::RoutingTable;
use crate::scenario::Scenario;
use crate::sim::SimTime;
use crate::topology::{NodeId, Role, Topology};

pub const ORDINARY_COLOR: (u8, u8, u8) = (0, 255, 0);
pub const ENDPOINT_COLOR: (u8, u8, u8) = (0, 0, 255);
pub const NODE_SIZE: (f64, f64) = (5.0, 5.0);

/// How a node is drawn in the animation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDisplay {
    pub id: NodeId,
    pub label: String,
    pub color: (u8, u8, u8),
    pub size: (f64, f64),
    pub position: Position,
}

impl NodeDisplay {
    /// Descriptors for every node, positioned from the topology itself so
    /// the animation can never drift from the simulated layout.
    pub fn describe(topology: &Topology) -> Vec<NodeDisplay> {
        topology
            .nodes()
            .iter()
            .map(|n| NodeDisplay {
                id: n.id(),
                label: n.label().to_string(),
                color: match n.role() {
                    Role::Ordinary => ORDINARY_COLOR,
                    Role::TunnelEndpoint => ENDPOINT_COLOR,
                },
                size: NODE_SIZE,
                position: n.position(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketEvent {
    Transmit,
    Receive,
    Drop,
}

impl PacketEvent {
    fn trace_code(self) -> char {
        match self {
            PacketEvent::Transmit => 't',
            PacketEvent::Receive => 'r',
            PacketEvent::Drop => 'd',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Request,
    Response,
}

/// One packet event on one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketRecord {
    pub at: SimTime,
    pub event: PacketEvent,
    pub node: NodeId,
    pub interface: Ipv4Addr,
    pub kind: PacketKind,
    pub seq: u32,
    pub bytes: u32,
}

/// Installed source-to-destination path at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSample {
    pub at: SimTime,
    pub from: NodeId,
    pub to: NodeId,
    /// `None` while no complete route is installed.
    pub path: Option<Vec<NodeId>>,
}

pub trait Observer {
    fn describe_nodes(&mut self, nodes: &[NodeDisplay]) -> Result<()>;

    fn routing_snapshot(&mut self, at: SimTime, tables: &[RoutingTable]) -> Result<()>;

    fn position_timeline(&mut self, at: SimTime, nodes: &[NodeDisplay]) -> Result<()>;

    fn route_sample(&mut self, _sample: &RouteSample) -> Result<()> {
        Ok(())
    }

    fn packet(&mut self, _record: &PacketRecord) -> Result<()> {
        Ok(())
    }

    /// Called once after the event loop reaches the stop time.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory observer.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub nodes: Vec<NodeDisplay>,
    pub routing_snapshots: Vec<(SimTime, Vec<RoutingTable>)>,
    pub position_snapshots: Vec<(SimTime, Vec<NodeDisplay>)>,
    pub route_samples: Vec<RouteSample>,
    pub packets: Vec<PacketRecord>,
    pub finished: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next hop toward `destination` in the first routing snapshot.
    pub fn snapshot_next_hop(&self, node: NodeId, destination: Ipv4Addr) -> Option<NodeId> {
        let (_, tables) = self.routing_snapshots.first()?;
        tables.get(node)?.lookup(destination).map(|e| e.next_hop)
    }

    pub fn packets_of(&self, event: PacketEvent, kind: PacketKind) -> usize {
        self.packets
            .iter()
            .filter(|p| p.event == event && p.kind == kind)
            .count()
    }
}

impl Observer for Recorder {
    fn describe_nodes(&mut self, nodes: &[NodeDisplay]) -> Result<()> {
        self.nodes = nodes.to_vec();
        Ok(())
    }

    fn routing_snapshot(&mut self, at: SimTime, tables: &[RoutingTable]) -> Result<()> {
        self.routing_snapshots.push((at, tables.to_vec()));
        Ok(())
    }

    fn position_timeline(&mut self, at: SimTime, nodes: &[NodeDisplay]) -> Result<()> {
        self.position_snapshots.push((at, nodes.to_vec()));
        Ok(())
    }

    fn route_sample(&mut self, sample: &RouteSample) -> Result<()> {
        self.route_samples.push(sample.clone());
        Ok(())
    }

    fn packet(&mut self, record: &PacketRecord) -> Result<()> {
        self.packets.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// An interface whose packets go to their own trace file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TracedInterface {
    node: NodeId,
    address: Ipv4Addr,
    file: String,
    lines: String,
}

/// Writes the run's artifacts into one output directory.
///
/// The routing dump is written as soon as the snapshot is taken. The
/// animation, route-tracking and packet-trace files are cumulative and are
/// written by [`Observer::finish`].
#[derive(Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    scenario: Scenario,
    anim: String,
    routes: String,
    traces: Vec<TracedInterface>,
    written: Vec<PathBuf>,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, config: &TopologyConfig, topology: &Topology) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut traces = Vec::new();
        if config.observation.packet_traces {
            let [w1, w2] = config.tunnel_endpoints();
            let wanted = [
                (config.source(), LinkKind::ContestedWireless, format!("Wormhole_Sta{}", config.source())),
                (
                    config.destination(),
                    LinkKind::ContestedWireless,
                    format!("Wormhole_Sta{}", config.destination()),
                ),
                (w1, LinkKind::PrivilegedTunnel, "Wormhole_W1".to_string()),
                (w2, LinkKind::PrivilegedTunnel, "Wormhole_W2".to_string()),
            ];
            for (node, kind, prefix) in wanted {
                let Some(n) = topology.node(node) else { continue };
                let Some(index) = n.interfaces().iter().position(|i| i.kind == kind) else {
                    continue;
                };
                traces.push(TracedInterface {
                    node,
                    address: n.interfaces()[index].address,
                    file: format!("{prefix}-{node}-{index}.tr"),
                    lines: String::new(),
                });
            }
        }

        Ok(Self {
            dir,
            scenario: topology.scenario(),
            anim: String::new(),
            routes: String::new(),
            traces,
            written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn routing_dump_name(scenario: Scenario) -> String {
        format!("routingtable-Wormhole{}.s", scenario.id())
    }

    pub fn animation_name(scenario: Scenario) -> String {
        format!("Wormhole_anim-{}.xml", scenario.id())
    }

    pub const ROUTE_TRACKING_NAME: &'static str = "Wormhole_rt.xml";

    fn write(&mut self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.join(name);
        fs::write(&path, contents)?;
        debug!(path = %path.display(), bytes = contents.len(), "artifact written");
        self.written.push(path);
        Ok(())
    }
}

impl Observer for ArtifactWriter {
    fn describe_nodes(&mut self, nodes: &[NodeDisplay]) -> Result<()> {
        for n in nodes {
            self.anim.push_str(&format!(
                "<node id=\"{}\" locX=\"{}\" locY=\"{}\" />\n",
                n.id, n.position.x, n.position.y
            ));
            self.anim.push_str(&format!(
                "<nu p=\"s\" t=\"0\" id=\"{}\" descr=\"{}\" />\n",
                n.id, n.label
            ));
            let (r, g, b) = n.color;
            self.anim.push_str(&format!(
                "<nu p=\"c\" t=\"0\" id=\"{}\" r=\"{r}\" g=\"{g}\" b=\"{b}\" />\n",
                n.id
            ));
            self.anim.push_str(&format!(
                "<nu p=\"d\" t=\"0\" id=\"{}\" w=\"{}\" h=\"{}\" />\n",
                n.id, n.size.0, n.size.1
            ));
        }
        Ok(())
    }

    fn routing_snapshot(&mut self, at: SimTime, tables: &[RoutingTable]) -> Result<()> {
        let dump: String = tables.iter().map(|t| t.render(at) + "\n").collect();
        let name = Self::routing_dump_name(self.scenario);
        self.write(&name, &dump)
    }

    fn position_timeline(&mut self, at: SimTime, nodes: &[NodeDisplay]) -> Result<()> {
        for n in nodes {
            self.anim.push_str(&format!(
                "<nu p=\"p\" t=\"{}\" id=\"{}\" x=\"{}\" y=\"{}\" />\n",
                at.as_secs_f64(),
                n.id,
                n.position.x,
                n.position.y
            ));
        }
        Ok(())
    }

    fn route_sample(&mut self, sample: &RouteSample) -> Result<()> {
        let path = match &sample.path {
            Some(p) => p.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
            None => "unreachable".to_string(),
        };
        self.routes.push_str(&format!(
            "<rt t=\"{}\" id=\"{}\" dest=\"{}\" path=\"{path}\" />\n",
            sample.at.as_secs_f64(),
            sample.from,
            sample.to
        ));
        Ok(())
    }

    fn packet(&mut self, record: &PacketRecord) -> Result<()> {
        let Some(trace) = self
            .traces
            .iter_mut()
            .find(|t| t.node == record.node && t.address == record.interface)
        else {
            return Ok(());
        };
        let kind = match record.kind {
            PacketKind::Request => "request",
            PacketKind::Response => "response",
        };
        trace.lines.push_str(&format!(
            "{} {:.6} /NodeList/{}/{} {kind} seq={} size={}\n",
            record.event.trace_code(),
            record.at.as_secs_f64(),
            record.node,
            record.interface,
            record.seq,
            record.bytes
        ));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let anim = format!(
            "<anim scenario=\"{}\">\n{}</anim>\n",
            self.scenario.id(),
            self.anim
        );
        self.write(&Self::animation_name(self.scenario), &anim)?;

        let routes = format!("<rtlinks>\n{}</rtlinks>\n", self.routes);
        self.write(Self::ROUTE_TRACKING_NAME, &routes)?;

        let traces = std::mem::take(&mut self.traces);
        for t in &traces {
            self.write(&t.file, &t.lines)?;
        }
        self.traces = traces;

        info!(dir = %self.dir.display(), files = self.written.len(), "artifacts written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::unique_scratch_dir;

    fn setup(scenario: Scenario) -> (TopologyConfig, Topology) {
        let cfg = TopologyConfig::default().with_scenario(scenario);
        let topo = Topology::build(&cfg).unwrap();
        (cfg, topo)
    }

    #[test]
    fn descriptors_use_labels_colors_and_topology_positions() {
        let (_, topo) = setup(Scenario::InRange);
        let nodes = NodeDisplay::describe(&topo);
        assert_eq!(nodes.len(), 11);
        assert_eq!(nodes[0].label, "N0");
        assert_eq!(nodes[0].color, ORDINARY_COLOR);
        assert_eq!(nodes[9].label, "W1");
        assert_eq!(nodes[10].label, "W2");
        assert_eq!(nodes[10].color, ENDPOINT_COLOR);
        assert!(nodes.iter().all(|n| n.size == NODE_SIZE));
        for (d, n) in nodes.iter().zip(topo.nodes()) {
            assert_eq!(d.position, n.position());
        }
    }

    #[test]
    fn recorder_reads_next_hop_from_first_snapshot() {
        let mut table = RoutingTable::new(0);
        table.install(crate::routing::RouteEntry {
            destination: Ipv4Addr::new(10, 1, 1, 9),
            gateway: Ipv4Addr::new(10, 1, 1, 10),
            interface: Ipv4Addr::new(10, 1, 1, 1),
            next_hop: 9,
            hops: 3,
            installed_at: SimTime::ZERO,
        });
        let mut rec = Recorder::new();
        rec.routing_snapshot(SimTime::from_millis(2_500), &[table]).unwrap();
        assert_eq!(rec.snapshot_next_hop(0, Ipv4Addr::new(10, 1, 1, 9)), Some(9));
        assert_eq!(rec.snapshot_next_hop(1, Ipv4Addr::new(10, 1, 1, 9)), None);
    }

    #[test]
    fn writer_names_files_by_scenario() {
        let (cfg, topo) = setup(Scenario::OutOfRange);
        let dir = unique_scratch_dir("observe-names");
        let mut writer = ArtifactWriter::new(&dir, &cfg, &topo).unwrap();
        writer.describe_nodes(&NodeDisplay::describe(&topo)).unwrap();
        writer.routing_snapshot(SimTime::from_millis(2_500), &[RoutingTable::new(0)]).unwrap();
        writer.finish().unwrap();

        let dump = fs::read_to_string(dir.join("routingtable-Wormhole1.s")).unwrap();
        assert!(dump.starts_with("Node: 0; Time: +2.5s"));
        let anim = fs::read_to_string(dir.join("Wormhole_anim-1.xml")).unwrap();
        assert!(anim.contains("descr=\"W1\""));
        assert!(anim.contains("r=\"0\" g=\"0\" b=\"255\""));
        assert!(dir.join("Wormhole_rt.xml").exists());
        for trace in ["Wormhole_Sta0-0-0.tr", "Wormhole_Sta8-8-0.tr", "Wormhole_W1-9-1.tr", "Wormhole_W2-10-1.tr"] {
            assert!(dir.join(trace).exists(), "{trace}");
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn packet_lines_go_to_the_matching_interface_only() {
        let (cfg, topo) = setup(Scenario::InRange);
        let dir = unique_scratch_dir("observe-trace");
        let mut writer = ArtifactWriter::new(&dir, &cfg, &topo).unwrap();
        writer
            .packet(&PacketRecord {
                at: SimTime::from_millis(2_000),
                event: PacketEvent::Transmit,
                node: 9,
                interface: Ipv4Addr::new(10, 1, 2, 1),
                kind: PacketKind::Request,
                seq: 0,
                bytes: 1024,
            })
            .unwrap();
        // Node 9's wireless interface is not traced.
        writer
            .packet(&PacketRecord {
                at: SimTime::from_millis(2_000),
                event: PacketEvent::Receive,
                node: 9,
                interface: Ipv4Addr::new(10, 1, 1, 10),
                kind: PacketKind::Request,
                seq: 0,
                bytes: 1024,
            })
            .unwrap();
        writer.finish().unwrap();

        let w1 = fs::read_to_string(dir.join("Wormhole_W1-9-1.tr")).unwrap();
        assert_eq!(w1.lines().count(), 1);
        assert!(w1.starts_with("t 2.000000 /NodeList/9/10.1.2.1 request seq=0 size=1024"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn traces_can_be_disabled() {
        let (mut cfg, topo) = setup(Scenario::InRange);
        cfg.observation.packet_traces = false;
        let dir = unique_scratch_dir("observe-notrace");
        let mut writer = ArtifactWriter::new(&dir, &cfg, &topo).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.written().len(), 2);
        let _ = fs::remove_dir_all(&dir);
    }
}
