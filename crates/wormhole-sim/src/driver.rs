//! Runs one scenario: the request/response flow plus scheduled observation.
//!
//! Everything the driver needs is built before the loop starts. During the
//! run only the event queue advances time and only the routing tables and
//! in-flight packets change.

use std::net::Ipv4Addr;

use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TopologyConfig;
use crate::error::Result;
use crate::link::LinkKind;
use crate::observe::{NodeDisplay, Observer, PacketEvent, PacketKind, PacketRecord, RouteSample};
use crate::radio::{NeighborGraph, RangePropagation};
use crate::routing::{OnDemandRouting, RoutingProtocol};
use crate::scenario::Scenario;
use crate::sim::{EventQueue, SimTime};
use crate::topology::{NodeId, Topology};
use crate::traffic::{Action, FlowSpec, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Packet {
    kind: PacketKind,
    seq: u32,
    origin: NodeId,
    target: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Scheduled(Action),
    Send { seq: u32 },
    Arrive {
        packet: Packet,
        node: NodeId,
        via: Ipv4Addr,
    },
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub scenario: Option<Scenario>,
    pub requests_sent: u32,
    pub requests_delivered: u32,
    pub responses_sent: u32,
    pub responses_delivered: u32,
    pub lost: u32,
    /// Packets that crossed the tunnel link, either direction.
    pub tunnel_traversals: u32,
    /// First path used by a request.
    pub forward_path: Option<Vec<NodeId>>,
    /// Source's next hop toward the destination at the routing snapshot.
    pub snapshot_next_hop: Option<NodeId>,
    pub snapshot_at: Option<SimTime>,
}

pub struct Driver<'a> {
    topology: &'a Topology,
    flow: FlowSpec,
    schedule: Schedule,
    routing: OnDemandRouting,
    rng: StdRng,
    queue: EventQueue<Event>,
    displays: Vec<NodeDisplay>,
    payload_bytes: u32,
    server_up: bool,
    client_up: bool,
    summary: RunSummary,
}

impl<'a> Driver<'a> {
    pub fn new(config: &TopologyConfig, topology: &'a Topology) -> Result<Self> {
        let flow = FlowSpec::from_config(config, topology)?;
        let schedule = Schedule::from_config(config)?;
        let medium = RangePropagation::new(config.radio_range);
        let graph = NeighborGraph::discover(topology, &medium, config.traffic.payload_bytes);
        let routing = OnDemandRouting::new(topology, graph);
        Ok(Self {
            topology,
            flow,
            schedule,
            routing,
            rng: StdRng::seed_from_u64(config.seed),
            queue: EventQueue::new(),
            displays: NodeDisplay::describe(topology),
            payload_bytes: config.traffic.payload_bytes,
            server_up: false,
            client_up: false,
            summary: RunSummary {
                scenario: Some(topology.scenario()),
                ..RunSummary::default()
            },
        })
    }

    pub fn flow(&self) -> &FlowSpec {
        &self.flow
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn routing(&self) -> &OnDemandRouting {
        &self.routing
    }

    /// Runs until the schedule's stop time, reporting to `observer`.
    pub fn run(mut self, observer: &mut dyn Observer) -> Result<RunSummary> {
        observer.describe_nodes(&self.displays)?;
        for entry in self.schedule.entries() {
            self.queue.schedule(entry.at, Event::Scheduled(entry.action));
        }
        let stop = self.schedule.stop();
        info!(
            scenario = %self.topology.scenario(),
            client = self.flow.client,
            server = self.flow.server,
            %stop,
            "run started"
        );

        while let Some((now, event)) = self.queue.pop_until(stop) {
            match event {
                Event::Scheduled(action) => self.on_action(now, action, observer)?,
                Event::Send { seq } => self.on_send(now, seq, observer)?,
                Event::Arrive { packet, node, via } => {
                    self.on_arrive(now, packet, node, via, observer)?
                }
            }
        }

        observer.finish()?;
        let s = &self.summary;
        info!(
            requests_sent = s.requests_sent,
            requests_delivered = s.requests_delivered,
            responses_delivered = s.responses_delivered,
            lost = s.lost,
            tunnel_traversals = s.tunnel_traversals,
            next_hop = ?s.snapshot_next_hop,
            "run finished"
        );
        Ok(self.summary)
    }

    fn on_action(&mut self, now: SimTime, action: Action, observer: &mut dyn Observer) -> Result<()> {
        debug!(at = %now, ?action, "scheduled action");
        match action {
            Action::ServerStart => self.server_up = true,
            Action::ServerStop => self.server_up = false,
            Action::ClientStart => {
                self.client_up = true;
                self.queue.schedule(now, Event::Send { seq: 0 });
            }
            Action::ClientStop => self.client_up = false,
            Action::RoutingSnapshot => {
                observer.routing_snapshot(now, self.routing.tables())?;
                let hop = self.routing.next_hop(self.flow.client, self.flow.server);
                if self.summary.snapshot_at.is_none() {
                    self.summary.snapshot_at = Some(now);
                    self.summary.snapshot_next_hop = hop;
                }
                info!(at = %now, node = self.flow.client, next_hop = ?hop, "routing snapshot");
            }
            Action::PositionSnapshot => observer.position_timeline(now, &self.displays)?,
            Action::RouteSample => {
                let path = self.routing.installed_path(self.flow.client, self.flow.server);
                observer.route_sample(&RouteSample {
                    at: now,
                    from: self.flow.client,
                    to: self.flow.server,
                    path,
                })?;
            }
        }
        Ok(())
    }

    fn on_send(&mut self, now: SimTime, seq: u32, observer: &mut dyn Observer) -> Result<()> {
        if !self.client_up || seq >= self.flow.max_packets {
            return Ok(());
        }
        self.summary.requests_sent += 1;
        let packet = Packet {
            kind: PacketKind::Request,
            seq,
            origin: self.flow.client,
            target: self.flow.server,
        };
        self.forward(now, packet, self.flow.client, observer)?;
        if seq + 1 < self.flow.max_packets {
            self.queue.schedule_in(self.flow.interval, Event::Send { seq: seq + 1 });
        }
        Ok(())
    }

    fn on_arrive(
        &mut self,
        now: SimTime,
        packet: Packet,
        node: NodeId,
        via: Ipv4Addr,
        observer: &mut dyn Observer,
    ) -> Result<()> {
        self.record(observer, now, PacketEvent::Receive, node, via, packet)?;
        if node != packet.target {
            return self.forward(now, packet, node, observer);
        }
        match packet.kind {
            PacketKind::Request if self.server_up => {
                self.summary.requests_delivered += 1;
                self.summary.responses_sent += 1;
                let reply = Packet {
                    kind: PacketKind::Response,
                    seq: packet.seq,
                    origin: node,
                    target: packet.origin,
                };
                self.forward(now, reply, node, observer)
            }
            PacketKind::Request => {
                debug!(at = %now, seq = packet.seq, "request arrived while server is down");
                self.summary.lost += 1;
                Ok(())
            }
            PacketKind::Response => {
                self.summary.responses_delivered += 1;
                Ok(())
            }
        }
    }

    /// Sends `packet` one hop from `from` along the current route.
    fn forward(
        &mut self,
        now: SimTime,
        packet: Packet,
        from: NodeId,
        observer: &mut dyn Observer,
    ) -> Result<()> {
        let Some(path) = self.routing.route(from, packet.target, now) else {
            warn!(at = %now, from, to = packet.target, seq = packet.seq, "no route, packet dropped");
            self.summary.lost += 1;
            return Ok(());
        };
        if packet.kind == PacketKind::Request && from == packet.origin && self.summary.forward_path.is_none() {
            self.summary.forward_path = Some(path.clone());
        }
        let Some(&next) = path.get(1) else {
            return Ok(());
        };
        let Some(hop) = self.routing.graph().best_hop(from, next).cloned() else {
            self.summary.lost += 1;
            return Ok(());
        };

        self.record(observer, now, PacketEvent::Transmit, from, hop.local, packet)?;
        if hop.kind == LinkKind::PrivilegedTunnel {
            self.summary.tunnel_traversals += 1;
        }

        let loss = self
            .topology
            .link(hop.link)
            .map_or(1.0, |l| l.profile().loss_probability());
        if loss > 0.0 && self.rng.random::<f64>() < loss {
            debug!(at = %now, from, to = next, seq = packet.seq, "lost on {}", hop.kind);
            self.summary.lost += 1;
            return self.record(observer, now, PacketEvent::Drop, next, hop.remote, packet);
        }

        self.queue.schedule_in(
            hop.latency,
            Event::Arrive {
                packet,
                node: next,
                via: hop.remote,
            },
        );
        Ok(())
    }

    fn record(
        &self,
        observer: &mut dyn Observer,
        at: SimTime,
        event: PacketEvent,
        node: NodeId,
        interface: Ipv4Addr,
        packet: Packet,
    ) -> Result<()> {
        observer.packet(&PacketRecord {
            at,
            event,
            node,
            interface,
            kind: packet.kind,
            seq: packet.seq,
            bytes: self.payload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Recorder;

    fn run(config: &TopologyConfig) -> (RunSummary, Recorder) {
        let topo = Topology::build(config).unwrap();
        let mut rec = Recorder::new();
        let summary = Driver::new(config, &topo).unwrap().run(&mut rec).unwrap();
        (summary, rec)
    }

    #[test]
    fn in_range_flow_uses_the_tunnel() {
        let cfg = TopologyConfig::default().with_scenario(Scenario::InRange);
        let (summary, rec) = run(&cfg);
        assert_eq!(summary.requests_sent, 8);
        assert_eq!(summary.requests_delivered, 8);
        assert_eq!(summary.responses_delivered, 8);
        assert_eq!(summary.lost, 0);
        assert_eq!(summary.forward_path, Some(vec![0, 9, 10, 8]));
        assert_eq!(summary.snapshot_next_hop, Some(9));
        // One tunnel crossing per request and per response.
        assert_eq!(summary.tunnel_traversals, 16);
        assert!(rec.finished);
    }

    #[test]
    fn out_of_range_flow_never_touches_the_tunnel() {
        let cfg = TopologyConfig::default().with_scenario(Scenario::OutOfRange);
        let (summary, _) = run(&cfg);
        assert_eq!(summary.forward_path, Some(vec![0, 1, 2, 3, 8]));
        assert_eq!(summary.snapshot_next_hop, Some(1));
        assert_eq!(summary.tunnel_traversals, 0);
        assert_eq!(summary.responses_delivered, summary.requests_sent);
    }

    #[test]
    fn snapshot_is_taken_inside_the_flow_window() {
        let cfg = TopologyConfig::default();
        let (summary, rec) = run(&cfg);
        let at = summary.snapshot_at.unwrap();
        assert!(cfg.traffic.client_start < at && at < cfg.traffic.client_stop);
        assert_eq!(rec.routing_snapshots.len(), 1);
        assert_eq!(rec.position_snapshots.len(), 1);
        assert_eq!(rec.route_samples.len(), 11);
    }

    #[test]
    fn packet_budget_caps_requests() {
        let mut cfg = TopologyConfig::default();
        cfg.traffic.max_packets = 3;
        let (summary, rec) = run(&cfg);
        assert_eq!(summary.requests_sent, 3);
        assert_eq!(rec.packets_of(PacketEvent::Transmit, PacketKind::Request) as u32, 3 * 3);
    }

    #[test]
    fn total_loss_on_the_medium_delivers_nothing() {
        let mut cfg = TopologyConfig::default().with_scenario(Scenario::OutOfRange);
        cfg.wireless.loss_percent = 100.0;
        cfg.tunnel.loss_percent = 0.0;
        let (summary, rec) = run(&cfg);
        assert_eq!(summary.requests_delivered, 0);
        assert_eq!(summary.lost, summary.requests_sent);
        assert_eq!(rec.packets_of(PacketEvent::Drop, PacketKind::Request) as u32, summary.lost);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut cfg = TopologyConfig::default().with_scenario(Scenario::OutOfRange);
        cfg.wireless.loss_percent = 30.0;
        let (a, ra) = run(&cfg);
        let (b, rb) = run(&cfg);
        assert_eq!(a, b);
        assert_eq!(ra.packets, rb.packets);
    }
}
