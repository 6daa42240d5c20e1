use std::fmt;

use serde::Serialize;

use crate::config::LayoutConfig;
use crate::error::{Result, SimError};
use crate::position::Position;

/// Tunnel-endpoint placement for a run.
///
/// A scenario only moves the two endpoints; node count and roles are the
/// same under every scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Endpoints sit beyond radio range of every ordinary node, so the
    /// tunnel cannot be reached over the wireless medium.
    OutOfRange,
    /// Endpoints sit next to the source and destination, one wireless hop
    /// from each.
    InRange,
}

impl Scenario {
    pub const ALL: [Scenario; 2] = [Scenario::OutOfRange, Scenario::InRange];

    pub fn from_id(id: i64) -> Result<Self> {
        match id {
            1 => Ok(Scenario::OutOfRange),
            2 => Ok(Scenario::InRange),
            other => Err(SimError::config(format!(
                "unknown scenario id {other} (expected 1 = out-of-range, 2 = in-range)"
            ))),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Scenario::OutOfRange => 1,
            Scenario::InRange => 2,
        }
    }

    /// Coordinates of the two tunnel endpoints, near-source first.
    pub fn endpoint_positions(self, layout: &LayoutConfig) -> [Position; 2] {
        let origin = layout.origin;
        match self {
            Scenario::OutOfRange => {
                let y = origin.y - layout.far_offset;
                [
                    Position::new(origin.x, y),
                    Position::new(origin.x + layout.far_span, y),
                ]
            }
            Scenario::InRange => {
                let d = layout.endpoint_offset;
                let terminus_x = origin.x + layout.terminus_offset;
                [
                    Position::new(origin.x - d, origin.y - d),
                    Position::new(terminus_x + d, origin.y - d),
                ]
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::OutOfRange => write!(f, "out-of-range"),
            Scenario::InRange => write!(f, "in-range"),
        }
    }
}
