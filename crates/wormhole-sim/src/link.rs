use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// The two classes of link a node can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Shared ad hoc medium, many-to-many, subject to loss.
    ContestedWireless,
    /// Dedicated point-to-point tunnel private to its two endpoints.
    PrivilegedTunnel,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::ContestedWireless => write!(f, "wireless"),
            LinkKind::PrivilegedTunnel => write!(f, "tunnel"),
        }
    }
}

/// Largest per-hop delay a configuration may ask for.
pub const MAX_DELAY_MS: f64 = 3_600_000.0;

/// Per-kind transmission parameters handed to the PHY/MAC layer.
///
/// For the contested medium `delay_ms` is the effective per-hop access delay
/// (contention plus propagation); for the tunnel it is the fixed channel delay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkProfile {
    pub rate_kbit: u64,
    pub delay_ms: f64,
    pub loss_percent: f32,
    /// Radio transmit power. `None` for wired links.
    pub tx_power_dbm: Option<f64>,
}

impl LinkProfile {
    /// 1 Mbit/s DSSS ad hoc radio at 10 dBm.
    pub fn contested_default() -> Self {
        Self {
            rate_kbit: 1_000,
            delay_ms: 5.0,
            loss_percent: 0.0,
            tx_power_dbm: Some(10.0),
        }
    }

    /// 5 Mbit/s, 2 ms point-to-point channel.
    pub fn tunnel_default() -> Self {
        Self {
            rate_kbit: 5_000,
            delay_ms: 2.0,
            loss_percent: 0.0,
            tx_power_dbm: None,
        }
    }

    /// Propagation delay. Values too large for a `Duration` saturate.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Serialization time of `bytes` at the link rate.
    pub fn transmit_time(&self, bytes: u32) -> Duration {
        if self.rate_kbit == 0 {
            return Duration::MAX;
        }
        let bits = bytes as u64 * 8;
        Duration::from_nanos(bits.saturating_mul(1_000_000) / self.rate_kbit)
    }

    /// Time for one packet of `bytes` to cross a single hop.
    pub fn hop_latency(&self, bytes: u32) -> Duration {
        self.delay().saturating_add(self.transmit_time(bytes))
    }

    /// Throughput left after loss, in kbit/s.
    pub fn effective_rate_kbit(&self) -> f64 {
        self.rate_kbit as f64 * (1.0 - (self.loss_percent as f64 / 100.0).clamp(0.0, 1.0))
    }

    pub fn loss_probability(&self) -> f64 {
        (self.loss_percent as f64 / 100.0).clamp(0.0, 1.0)
    }

    /// True when `self` is strictly faster and strictly lower-latency than
    /// `other`, and no lossier.
    pub fn outperforms(&self, other: &LinkProfile) -> bool {
        self.effective_rate_kbit() > other.effective_rate_kbit()
            && self.delay_ms < other.delay_ms
            && self.loss_percent <= other.loss_percent
    }
}

impl fmt::Display for LinkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate {}kbit delay {}ms loss {}%",
            self.rate_kbit, self.delay_ms, self.loss_percent
        )?;
        if let Some(power) = self.tx_power_dbm {
            write!(f, " txpower {}dBm", power)?;
        }
        Ok(())
    }
}
