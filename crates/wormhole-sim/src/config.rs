//! Run configuration.
//!
//! `TopologyConfigInput` is the loosely-typed TOML form where every field is
//! optional. `resolve()` fills defaults, validates, and produces the immutable
//! [`TopologyConfig`] that every component receives by reference.

use std::time::Duration;

use serde::Deserialize;

use crate::addressing::{AddressPlan, Subnet};
use crate::error::{Result, SimError};
use crate::link::{LinkProfile, MAX_DELAY_MS};
use crate::position::Position;
use crate::scenario::Scenario;
use crate::sim::SimTime;

pub const CONFIG_VERSION: u32 = 1;

// ── Input (TOML) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyConfigInput {
    pub version: u32,
    pub scenario: Option<i64>,
    pub ordinary_nodes: Option<usize>,
    pub seed: Option<u64>,
    pub stop_s: Option<f64>,
    pub layout: LayoutInput,
    pub radio: RadioInput,
    pub wireless: LinkInput,
    pub tunnel: LinkInput,
    pub addressing: AddressingInput,
    pub traffic: TrafficInput,
    pub observation: ObservationInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LayoutInput {
    pub origin_x: Option<f64>,
    pub origin_y: Option<f64>,
    pub bottom_row_nodes: Option<usize>,
    pub bottom_separation: Option<f64>,
    pub bottom_offset: Option<f64>,
    pub top_separation: Option<f64>,
    pub top_offset: Option<f64>,
    pub terminus_offset: Option<f64>,
    pub endpoint_offset: Option<f64>,
    pub far_offset: Option<f64>,
    pub far_span: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadioInput {
    pub range: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub rate_kbit: Option<u64>,
    pub delay_ms: Option<f64>,
    pub loss_percent: Option<f32>,
    pub tx_power_dbm: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AddressingInput {
    pub wireless: Option<String>,
    pub tunnel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrafficInput {
    pub port: Option<u16>,
    pub max_packets: Option<u32>,
    pub interval_ms: Option<u64>,
    pub payload_bytes: Option<u32>,
    pub server_start_s: Option<f64>,
    pub server_stop_s: Option<f64>,
    pub client_start_s: Option<f64>,
    pub client_stop_s: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObservationInput {
    pub routing_snapshot_s: Option<f64>,
    pub position_snapshot_s: Option<f64>,
    pub route_tracking: Option<bool>,
    pub route_tracking_start_s: Option<f64>,
    pub route_tracking_stop_s: Option<f64>,
    pub route_tracking_period_ms: Option<u64>,
    pub packet_traces: Option<bool>,
}

// ── Resolved ────────────────────────────────────────────────────────

/// Coordinates that drive the Position Model. Units are simulator metres.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    pub origin: Position,
    /// Number of ordinary nodes on the bottom row; the rest of the
    /// non-terminal ordinary nodes go on the top row.
    pub bottom_row_nodes: usize,
    pub bottom_separation: f64,
    pub bottom_offset: f64,
    pub top_separation: f64,
    pub top_offset: f64,
    /// x distance from the origin to the destination node.
    pub terminus_offset: f64,
    /// In-range endpoints sit this far up and outward from source/destination.
    pub endpoint_offset: f64,
    /// Out-of-range endpoints sit this far above the origin...
    pub far_offset: f64,
    /// ...and this far apart horizontally.
    pub far_span: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            origin: Position::new(0.0, 30.0),
            bottom_row_nodes: 3,
            bottom_separation: 25.0,
            bottom_offset: 12.0,
            top_separation: 20.0,
            top_offset: 25.0,
            terminus_offset: 100.0,
            endpoint_offset: 10.0,
            far_offset: 100.0,
            far_span: 130.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrafficConfig {
    pub port: u16,
    pub max_packets: u32,
    pub interval: Duration,
    pub payload_bytes: u32,
    pub server_start: SimTime,
    pub server_stop: SimTime,
    pub client_start: SimTime,
    pub client_stop: SimTime,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            port: 9,
            max_packets: 10,
            interval: Duration::from_secs(1),
            payload_bytes: 1024,
            server_start: SimTime::from_millis(1_000),
            server_stop: SimTime::from_millis(10_000),
            client_start: SimTime::from_millis(2_000),
            client_stop: SimTime::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteTracking {
    pub start: SimTime,
    pub stop: SimTime,
    pub period: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationConfig {
    pub routing_snapshot_at: SimTime,
    pub position_snapshot_at: SimTime,
    pub route_tracking: Option<RouteTracking>,
    pub packet_traces: bool,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            routing_snapshot_at: SimTime::from_millis(2_500),
            position_snapshot_at: SimTime::from_millis(2_500),
            route_tracking: Some(RouteTracking {
                start: SimTime::from_millis(2_500),
                stop: SimTime::from_millis(5_000),
                period: Duration::from_millis(250),
            }),
            packet_traces: true,
        }
    }
}

/// Everything a run needs, fixed before the event loop starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyConfig {
    pub version: u32,
    pub scenario: Scenario,
    pub ordinary_nodes: usize,
    pub seed: u64,
    pub stop_time: SimTime,
    pub layout: LayoutConfig,
    pub radio_range: f64,
    pub wireless: LinkProfile,
    pub tunnel: LinkProfile,
    pub addressing: AddressPlan,
    pub traffic: TrafficConfig,
    pub observation: ObservationConfig,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            scenario: Scenario::InRange,
            ordinary_nodes: 9,
            seed: 1,
            stop_time: SimTime::from_millis(10_000),
            layout: LayoutConfig::default(),
            radio_range: 35.0,
            wireless: LinkProfile::contested_default(),
            tunnel: LinkProfile::tunnel_default(),
            addressing: AddressPlan::default(),
            traffic: TrafficConfig::default(),
            observation: ObservationConfig::default(),
        }
    }
}

impl TopologyConfig {
    /// Ordinary nodes plus the two tunnel endpoints.
    pub fn node_count(&self) -> usize {
        self.ordinary_nodes + 2
    }

    /// The attack source: the first ordinary node.
    pub fn source(&self) -> usize {
        0
    }

    /// The attack destination: the last ordinary node.
    pub fn destination(&self) -> usize {
        self.ordinary_nodes - 1
    }

    pub fn tunnel_endpoints(&self) -> [usize; 2] {
        [self.ordinary_nodes, self.ordinary_nodes + 1]
    }

    pub fn top_row_nodes(&self) -> usize {
        self.ordinary_nodes
            .saturating_sub(2)
            .saturating_sub(self.layout.bottom_row_nodes)
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(TopologyConfig::default());
        }
        let parsed: TopologyConfigInput = toml::from_str(input)
            .map_err(|e| SimError::config(format!("invalid config TOML: {e}")))?;
        parsed.resolve()
    }

    /// Structural checks that do not depend on node positions.
    pub fn validate(&self) -> Result<()> {
        if self.ordinary_nodes < 4 {
            return Err(SimError::config(format!(
                "need at least 4 ordinary nodes for a two-row path, got {}",
                self.ordinary_nodes
            )));
        }
        if self.layout.bottom_row_nodes == 0 || self.top_row_nodes() == 0 {
            return Err(SimError::config(format!(
                "{} ordinary nodes with {} on the bottom row leaves an empty row",
                self.ordinary_nodes, self.layout.bottom_row_nodes
            )));
        }
        let wireless_hosts = self.addressing.wireless.host_capacity() as usize;
        if self.ordinary_nodes > wireless_hosts.saturating_sub(2) {
            return Err(SimError::config(format!(
                "wireless subnet {} exhausted: {} ordinary nodes plus 2 endpoints need addresses, it holds {wireless_hosts}",
                self.addressing.wireless, self.ordinary_nodes
            )));
        }
        if self.addressing.tunnel.host_capacity() < 2 {
            return Err(SimError::config(format!(
                "tunnel subnet {} exhausted: it cannot address both endpoints",
                self.addressing.tunnel
            )));
        }
        if !(self.radio_range.is_finite() && self.radio_range > 0.0) {
            return Err(SimError::config(format!(
                "radio range must be positive, got {}",
                self.radio_range
            )));
        }
        if self.layout.far_offset <= self.radio_range {
            return Err(SimError::config(format!(
                "out-of-range offset {} does not exceed radio range {}",
                self.layout.far_offset, self.radio_range
            )));
        }
        if self.traffic.max_packets == 0 {
            return Err(SimError::config("traffic must send at least one packet"));
        }
        if self.traffic.interval.is_zero() {
            return Err(SimError::config("packet interval must be non-zero"));
        }
        for (name, profile) in [("wireless", &self.wireless), ("tunnel", &self.tunnel)] {
            if profile.rate_kbit == 0 {
                return Err(SimError::config(format!("{name} link rate must be non-zero")));
            }
            if !(profile.delay_ms.is_finite() && (0.0..=MAX_DELAY_MS).contains(&profile.delay_ms)) {
                return Err(SimError::config(format!(
                    "{name} link delay must be within 0..={MAX_DELAY_MS} ms, got {}",
                    profile.delay_ms
                )));
            }
            if !(0.0..=100.0).contains(&profile.loss_percent) {
                return Err(SimError::config(format!(
                    "{name} link loss must be within 0..=100%, got {}",
                    profile.loss_percent
                )));
            }
        }
        AddressPlan::new(self.addressing.wireless, self.addressing.tunnel)?;
        Ok(())
    }
}

impl TopologyConfigInput {
    pub fn resolve(self) -> Result<TopologyConfig> {
        let defaults = TopologyConfig::default();

        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(SimError::config(format!(
                "unsupported config version {version}"
            )));
        }

        let scenario = match self.scenario {
            Some(id) => Scenario::from_id(id)?,
            None => defaults.scenario,
        };

        let l = self.layout;
        let dl = defaults.layout;
        let layout = LayoutConfig {
            origin: Position::new(
                l.origin_x.unwrap_or(dl.origin.x),
                l.origin_y.unwrap_or(dl.origin.y),
            ),
            bottom_row_nodes: l.bottom_row_nodes.unwrap_or(dl.bottom_row_nodes),
            bottom_separation: l.bottom_separation.unwrap_or(dl.bottom_separation),
            bottom_offset: l.bottom_offset.unwrap_or(dl.bottom_offset),
            top_separation: l.top_separation.unwrap_or(dl.top_separation),
            top_offset: l.top_offset.unwrap_or(dl.top_offset),
            terminus_offset: l.terminus_offset.unwrap_or(dl.terminus_offset),
            endpoint_offset: l.endpoint_offset.unwrap_or(dl.endpoint_offset),
            far_offset: l.far_offset.unwrap_or(dl.far_offset),
            far_span: l.far_span.unwrap_or(dl.far_span),
        };

        let addressing = AddressPlan {
            wireless: parse_subnet(self.addressing.wireless, defaults.addressing.wireless)?,
            tunnel: parse_subnet(self.addressing.tunnel, defaults.addressing.tunnel)?,
        };

        let t = self.traffic;
        let dt = defaults.traffic;
        let traffic = TrafficConfig {
            port: t.port.unwrap_or(dt.port),
            max_packets: t.max_packets.unwrap_or(dt.max_packets),
            interval: t.interval_ms.map(Duration::from_millis).unwrap_or(dt.interval),
            payload_bytes: t.payload_bytes.unwrap_or(dt.payload_bytes),
            server_start: secs_or(t.server_start_s, dt.server_start)?,
            server_stop: secs_or(t.server_stop_s, dt.server_stop)?,
            client_start: secs_or(t.client_start_s, dt.client_start)?,
            client_stop: secs_or(t.client_stop_s, dt.client_stop)?,
        };

        let o = self.observation;
        let d_o = defaults.observation;
        let route_tracking = match o.route_tracking {
            Some(false) => None,
            _ => {
                let base = d_o.route_tracking.clone().unwrap_or(RouteTracking {
                    start: d_o.routing_snapshot_at,
                    stop: defaults.stop_time,
                    period: Duration::from_millis(250),
                });
                Some(RouteTracking {
                    start: secs_or(o.route_tracking_start_s, base.start)?,
                    stop: secs_or(o.route_tracking_stop_s, base.stop)?,
                    period: o
                        .route_tracking_period_ms
                        .map(Duration::from_millis)
                        .unwrap_or(base.period),
                })
            }
        };
        let observation = ObservationConfig {
            routing_snapshot_at: secs_or(o.routing_snapshot_s, d_o.routing_snapshot_at)?,
            position_snapshot_at: secs_or(o.position_snapshot_s, d_o.position_snapshot_at)?,
            route_tracking,
            packet_traces: o.packet_traces.unwrap_or(d_o.packet_traces),
        };

        let config = TopologyConfig {
            version,
            scenario,
            ordinary_nodes: self.ordinary_nodes.unwrap_or(defaults.ordinary_nodes),
            seed: self.seed.unwrap_or(defaults.seed),
            stop_time: secs_or(self.stop_s, defaults.stop_time)?,
            layout,
            radio_range: self.radio.range.unwrap_or(defaults.radio_range),
            wireless: resolve_link(self.wireless, defaults.wireless),
            tunnel: resolve_link(self.tunnel, defaults.tunnel),
            addressing,
            traffic,
            observation,
        };
        config.validate()?;
        Ok(config)
    }
}

fn secs_or(value: Option<f64>, default: SimTime) -> Result<SimTime> {
    value.map(SimTime::try_from_secs).unwrap_or(Ok(default))
}

fn parse_subnet(value: Option<String>, default: Subnet) -> Result<Subnet> {
    match value {
        Some(s) => s.parse(),
        None => Ok(default),
    }
}

fn resolve_link(input: LinkInput, default: LinkProfile) -> LinkProfile {
    LinkProfile {
        rate_kbit: input.rate_kbit.unwrap_or(default.rate_kbit),
        delay_ms: input.delay_ms.unwrap_or(default.delay_ms),
        loss_percent: input.loss_percent.unwrap_or(default.loss_percent),
        tx_power_dbm: input.tx_power_dbm.or(default.tx_power_dbm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_reference_scenario() {
        let cfg = TopologyConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, TopologyConfig::default());
        assert_eq!(cfg.node_count(), 11);
        assert_eq!(cfg.source(), 0);
        assert_eq!(cfg.destination(), 8);
        assert_eq!(cfg.tunnel_endpoints(), [9, 10]);
        assert_eq!(cfg.top_row_nodes(), 4);
        assert_eq!(cfg.scenario, Scenario::InRange);
    }

    #[test]
    fn parse_toml_overrides() {
        let toml = r#"
            version = 1
            scenario = 1
            seed = 7
            stop_s = 12.0

            [radio]
            range = 40.0

            [tunnel]
            rate_kbit = 10000
            delay_ms = 1.0

            [addressing]
            wireless = "192.168.10.0/255.255.255.0"
            tunnel = "192.168.20.0/30"

            [traffic]
            max_packets = 4
            interval_ms = 500
            client_stop_s = 11.0

            [observation]
            routing_snapshot_s = 3.0
            route_tracking = false
        "#;

        let cfg = TopologyConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.scenario, Scenario::OutOfRange);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.stop_time, SimTime::from_millis(12_000));
        assert_eq!(cfg.radio_range, 40.0);
        assert_eq!(cfg.tunnel.rate_kbit, 10_000);
        assert_eq!(cfg.tunnel.delay_ms, 1.0);
        assert_eq!(cfg.tunnel.loss_percent, 0.0);
        assert_eq!(cfg.addressing.wireless.to_string(), "192.168.10.0/24");
        assert_eq!(cfg.addressing.tunnel.prefix_len(), 30);
        assert_eq!(cfg.traffic.max_packets, 4);
        assert_eq!(cfg.traffic.interval, Duration::from_millis(500));
        assert_eq!(cfg.traffic.client_stop, SimTime::from_millis(11_000));
        assert_eq!(cfg.observation.routing_snapshot_at, SimTime::from_millis(3_000));
        assert!(cfg.observation.route_tracking.is_none());
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        let err = TopologyConfig::from_toml_str("scenario = 7").unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn overlapping_subnets_are_rejected() {
        let toml = r#"
            [addressing]
            wireless = "10.1.0.0/16"
            tunnel = "10.1.2.0/24"
        "#;
        let err = TopologyConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn negative_times_are_rejected() {
        let err = TopologyConfig::from_toml_str("stop_s = -1.0").unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn far_offset_must_clear_radio_range() {
        let toml = r#"
            [radio]
            range = 150.0
        "#;
        assert!(TopologyConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn too_few_ordinary_nodes_is_rejected() {
        let err = TopologyConfig::from_toml_str("ordinary_nodes = 3").unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("at least 4")));
    }

    #[test]
    fn empty_bottom_row_is_rejected() {
        let toml = r#"
            [layout]
            bottom_row_nodes = 0
        "#;
        let err = TopologyConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("empty row")));
    }

    #[test]
    fn empty_top_row_is_rejected() {
        // 9 ordinary nodes: source, destination and 7 on the bottom row.
        let toml = r#"
            [layout]
            bottom_row_nodes = 7
        "#;
        let err = TopologyConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("empty row")));
    }

    #[test]
    fn node_count_beyond_wireless_subnet_is_rejected() {
        let err = TopologyConfig::from_toml_str("ordinary_nodes = 1099511627776").unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("exhausted")));

        // 252 ordinary nodes plus 2 endpoints exactly fill a /24.
        let mut cfg = TopologyConfig::default();
        cfg.ordinary_nodes = 252;
        assert!(cfg.validate().is_ok());
        cfg.ordinary_nodes = 253;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn single_host_tunnel_subnet_is_rejected() {
        let toml = r#"
            [addressing]
            tunnel = "10.1.2.1/32"
        "#;
        let err = TopologyConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("tunnel subnet"));
    }

    #[test]
    fn oversized_link_delay_is_rejected() {
        let toml = r#"
            [wireless]
            delay_ms = 1e30
        "#;
        let err = TopologyConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, SimError::Configuration(ref m) if m.contains("wireless link delay")));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        assert!(TopologyConfig::from_toml_str("version = 3").is_err());
    }
}
