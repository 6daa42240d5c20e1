//! Wormhole tunnel injection.
//!
//! The injector does not simulate discovery of the tunnel. It only makes the
//! privileged link physically present with parameters that beat the shared
//! medium, and leaves it to the routing layer to find and prefer it.

use tracing::info;

use crate::config::TopologyConfig;
use crate::error::{Result, SimError};
use crate::link::{LinkKind, LinkProfile};
use crate::topology::{Role, Topology};

pub struct TunnelInjector<'a> {
    contested: &'a LinkProfile,
    tunnel: &'a LinkProfile,
}

impl<'a> TunnelInjector<'a> {
    pub fn new(config: &'a TopologyConfig) -> Self {
        Self::with_profiles(&config.wireless, &config.tunnel)
    }

    pub fn with_profiles(contested: &'a LinkProfile, tunnel: &'a LinkProfile) -> Self {
        Self { contested, tunnel }
    }

    /// The tunnel must be strictly faster, strictly lower-latency and no
    /// lossier than the contested medium.
    pub fn validate(&self) -> Result<()> {
        if !self.tunnel.outperforms(self.contested) {
            return Err(SimError::config(format!(
                "tunnel ({}) does not outperform the wireless medium ({})",
                self.tunnel, self.contested
            )));
        }
        Ok(())
    }

    /// Applies the tunnel parameters to the topology's privileged link.
    pub fn inject(&self, topology: &mut Topology) -> Result<()> {
        self.validate()?;

        let (id, members) = {
            let mut tunnels = topology.links_of(LinkKind::PrivilegedTunnel);
            let link = tunnels
                .next()
                .ok_or_else(|| SimError::config("topology has no tunnel link to configure"))?;
            if tunnels.next().is_some() {
                return Err(SimError::config("topology has more than one tunnel link"));
            }
            (link.id(), link.members().to_vec())
        };

        if members.len() != 2 {
            return Err(SimError::config(format!(
                "tunnel link has {} members, expected 2",
                members.len()
            )));
        }
        for &m in &members {
            let role = topology.node(m).map(|n| n.role());
            if role != Some(Role::TunnelEndpoint) {
                return Err(SimError::config(format!(
                    "tunnel member {m} is not a tunnel endpoint"
                )));
            }
        }

        let link = topology
            .link_mut(id)
            .ok_or_else(|| SimError::config("tunnel link vanished"))?;
        link.set_profile(self.tunnel.clone());
        info!(
            a = members[0],
            b = members[1],
            tunnel = %self.tunnel,
            wireless = %self.contested,
            "wormhole tunnel injected"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tunnel_slower_than_medium() {
        let wireless = LinkProfile::contested_default();
        let slow = LinkProfile {
            rate_kbit: 500,
            ..LinkProfile::tunnel_default()
        };
        let err = TunnelInjector::with_profiles(&wireless, &slow)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("does not outperform"));
    }

    #[test]
    fn rejects_tunnel_with_higher_delay() {
        let wireless = LinkProfile::contested_default();
        let laggy = LinkProfile {
            delay_ms: 5.0,
            ..LinkProfile::tunnel_default()
        };
        assert!(TunnelInjector::with_profiles(&wireless, &laggy).validate().is_err());
    }

    #[test]
    fn rejects_lossier_tunnel() {
        let wireless = LinkProfile::contested_default();
        let lossy = LinkProfile {
            loss_percent: 1.0,
            ..LinkProfile::tunnel_default()
        };
        assert!(TunnelInjector::with_profiles(&wireless, &lossy).validate().is_err());
    }

    #[test]
    fn reinjecting_a_built_topology_updates_the_tunnel_profile() {
        let cfg = TopologyConfig::default();
        let mut topo = Topology::build(&cfg).unwrap();
        let wireless = LinkProfile::contested_default();
        let faster = LinkProfile {
            rate_kbit: 20_000,
            ..LinkProfile::tunnel_default()
        };
        TunnelInjector::with_profiles(&wireless, &faster)
            .inject(&mut topo)
            .unwrap();
        let tunnel = topo.links_of(LinkKind::PrivilegedTunnel).next().unwrap();
        assert_eq!(tunnel.profile().rate_kbit, 20_000);
    }

    #[test]
    fn build_fails_fast_on_unattractive_tunnel() {
        let mut cfg = TopologyConfig::default();
        cfg.tunnel.delay_ms = 50.0;
        assert!(matches!(
            Topology::build(&cfg),
            Err(SimError::Configuration(_))
        ));
    }
}
