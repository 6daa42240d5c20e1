//! The single request/response flow and the run schedule.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;

use crate::config::TopologyConfig;
use crate::error::{Result, SimError};
use crate::sim::SimTime;
use crate::topology::{NodeId, Topology};

/// Upper bound on route-tracking samples in one run.
pub const MAX_ROUTE_SAMPLES: u64 = 100_000;

/// One UDP request/response flow from a client node to a server node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSpec {
    pub client: NodeId,
    pub server: NodeId,
    pub destination: Ipv4Addr,
    pub port: u16,
    pub max_packets: u32,
    pub interval: Duration,
    pub payload_bytes: u32,
}

impl FlowSpec {
    pub fn from_config(config: &TopologyConfig, topology: &Topology) -> Result<Self> {
        let server = config.destination();
        let destination = topology
            .node(server)
            .and_then(|n| n.primary_address())
            .ok_or_else(|| SimError::config(format!("server node {server} has no address")))?;
        Ok(Self {
            client: config.source(),
            server,
            destination,
            port: config.traffic.port,
            max_packets: config.traffic.max_packets,
            interval: config.traffic.interval,
            payload_bytes: config.traffic.payload_bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Flow,
    Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ServerStart,
    ServerStop,
    ClientStart,
    ClientStop,
    RoutingSnapshot,
    PositionSnapshot,
    RouteSample,
}

impl Action {
    pub fn category(self) -> ActionCategory {
        match self {
            Action::ServerStart | Action::ServerStop | Action::ClientStart | Action::ClientStop => {
                ActionCategory::Flow
            }
            Action::RoutingSnapshot | Action::PositionSnapshot | Action::RouteSample => {
                ActionCategory::Observation
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub at: SimTime,
    pub action: Action,
}

/// Ordered `(time, action)` entries declared before the event loop starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
    stop: SimTime,
}

impl Schedule {
    /// Accepts entries in the given order. Within a category, times must not
    /// decrease, and nothing may be scheduled after `stop`.
    pub fn from_entries(entries: Vec<ScheduleEntry>, stop: SimTime) -> Result<Self> {
        let mut last: Vec<(ActionCategory, SimTime)> = Vec::new();
        for e in &entries {
            if e.at > stop {
                return Err(SimError::config(format!(
                    "{:?} at {} is after the simulation stop at {stop}",
                    e.action, e.at
                )));
            }
            let cat = e.action.category();
            match last.iter_mut().find(|(c, _)| *c == cat) {
                Some((_, prev)) if e.at < *prev => {
                    return Err(SimError::config(format!(
                        "{:?} at {} goes back in time within {cat:?} (previous {})",
                        e.action, e.at, prev
                    )));
                }
                Some((_, prev)) => *prev = e.at,
                None => last.push((cat, e.at)),
            }
        }
        Ok(Self { entries, stop })
    }

    /// Builds the flow windows and observation points from the configuration.
    pub fn from_config(config: &TopologyConfig) -> Result<Self> {
        let t = &config.traffic;
        let o = &config.observation;
        let stop = config.stop_time;

        if t.server_start >= t.server_stop {
            return Err(SimError::config(format!(
                "server start {} is not before server stop {}",
                t.server_start, t.server_stop
            )));
        }
        if t.client_start >= t.client_stop {
            return Err(SimError::config(format!(
                "client start {} is not before client stop {}",
                t.client_start, t.client_stop
            )));
        }
        for (what, at) in [
            ("routing snapshot", o.routing_snapshot_at),
            ("position snapshot", o.position_snapshot_at),
        ] {
            if !(t.client_start < at && at < t.client_stop) {
                return Err(SimError::config(format!(
                    "{what} at {at} must fall strictly inside the flow window {}..{}",
                    t.client_start, t.client_stop
                )));
            }
        }

        let mut flow = vec![
            ScheduleEntry { at: t.server_start, action: Action::ServerStart },
            ScheduleEntry { at: t.client_start, action: Action::ClientStart },
            ScheduleEntry { at: t.server_stop, action: Action::ServerStop },
            ScheduleEntry { at: t.client_stop, action: Action::ClientStop },
        ];
        flow.sort_by_key(|e| e.at);

        let mut observation = vec![
            ScheduleEntry { at: o.routing_snapshot_at, action: Action::RoutingSnapshot },
            ScheduleEntry { at: o.position_snapshot_at, action: Action::PositionSnapshot },
        ];
        if let Some(rt) = &o.route_tracking {
            if rt.period.is_zero() {
                return Err(SimError::config("route tracking period must be non-zero"));
            }
            let last = rt.stop.min(stop);
            if rt.start <= last {
                let period_ns = u64::try_from(rt.period.as_nanos()).unwrap_or(u64::MAX);
                let samples = (last.0 - rt.start.0) / period_ns + 1;
                if samples > MAX_ROUTE_SAMPLES {
                    return Err(SimError::config(format!(
                        "route tracking every {:?} from {} to {last} takes {samples} samples, limit is {MAX_ROUTE_SAMPLES}",
                        rt.period, rt.start
                    )));
                }
                let mut at = rt.start;
                for _ in 0..samples {
                    observation.push(ScheduleEntry { at, action: Action::RouteSample });
                    at = at.saturating_add(rt.period);
                }
            }
        }
        observation.sort_by_key(|e| e.at);

        let mut entries = flow;
        entries.extend(observation);
        entries.sort_by_key(|e| e.at);
        Self::from_entries(entries, stop)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn stop(&self) -> SimTime {
        self.stop
    }

    /// First time `action` is scheduled.
    pub fn first(&self, action: Action) -> Option<SimTime> {
        self.entries.iter().find(|e| e.action == action).map(|e| e.at)
    }

    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}
