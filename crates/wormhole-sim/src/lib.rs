//! Wormhole-attack scenario builder for a discrete-event wireless ad hoc
//! network.
//!
//! A run places ordinary nodes (nine by default) on a two-row ring between a
//! source and a destination, adds two colluding tunnel endpoints joined by a
//! privileged point-to-point link, and drives one request/response flow over
//! the shared medium while on-demand routing decides whether the tunnel is used.
//!
//! Build order is fixed: [`Scenario`] selects endpoint placement, the
//! [`position::PositionModel`] places every node, [`Topology::build`] wires
//! links and addresses, the [`tunnel::TunnelInjector`] configures the tunnel,
//! and the [`driver::Driver`] runs the event loop and reports to an
//! [`observe::Observer`].

pub mod addressing;
pub mod config;
pub mod driver;
pub mod error;
pub mod link;
pub mod observe;
pub mod position;
pub mod radio;
pub mod routing;
pub mod scenario;
pub mod sim;
pub mod topology;
pub mod traffic;
pub mod tunnel;

pub mod test_util;

pub use config::TopologyConfig;
pub use driver::{Driver, RunSummary};
pub use error::{Result, SimError};
pub use scenario::Scenario;
pub use topology::Topology;

/// Builds the topology for `config` and runs it to completion.
pub fn run_scenario(config: &TopologyConfig, observer: &mut dyn observe::Observer) -> Result<RunSummary> {
    let topology = Topology::build(config)?;
    Driver::new(config, &topology)?.run(observer)
}
