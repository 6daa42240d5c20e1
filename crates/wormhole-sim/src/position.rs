//! Deterministic node placement.
//!
//! Ordinary nodes form a ring-shaped path: the source at the origin, a bottom
//! row and a top row running left to right, and the destination opposite the
//! origin. The two tunnel endpoints are placed by the active [`Scenario`].
//!
//! Index ranges are mapped to placement rules through an ordered table of
//! closed intervals that is checked for gaps and overlaps when it is built.
//! The same model feeds both the topology builder and the animation output.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::warn;

use crate::config::{LayoutConfig, TopologyConfig};
use crate::error::{Result, SimError};
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The attack source.
    Origin,
    BottomRow,
    TopRow,
    /// The attack destination.
    Terminus,
    TunnelEndpoint,
}

impl Placement {
    /// Exact interval width the rule requires, if fixed.
    fn required_len(self) -> Option<usize> {
        match self {
            Placement::Origin | Placement::Terminus => Some(1),
            Placement::TunnelEndpoint => Some(2),
            Placement::BottomRow | Placement::TopRow => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Interval {
    first: usize,
    last: usize,
    rule: Placement,
}

/// Ordered, gap-free, non-overlapping cover of `0..len` by placement rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementTable {
    intervals: Vec<Interval>,
}

impl PlacementTable {
    pub fn new(entries: Vec<(RangeInclusive<usize>, Placement)>) -> Result<Self> {
        let mut intervals = Vec::with_capacity(entries.len());
        let mut expected_first = 0usize;
        for (range, rule) in entries {
            let (first, last) = (*range.start(), *range.end());
            if first > last {
                return Err(SimError::config(format!(
                    "placement interval {first}..={last} for {rule:?} is empty"
                )));
            }
            if first != expected_first {
                let kind = if first > expected_first { "gap" } else { "overlap" };
                return Err(SimError::config(format!(
                    "placement table has a {kind} at index {expected_first} ({rule:?} starts at {first})"
                )));
            }
            if let Some(len) = rule.required_len() {
                if last - first + 1 != len {
                    return Err(SimError::config(format!(
                        "{rule:?} needs exactly {len} indices, got {first}..={last}"
                    )));
                }
            }
            intervals.push(Interval { first, last, rule });
            expected_first = last + 1;
        }
        if intervals.is_empty() {
            return Err(SimError::config("placement table is empty"));
        }
        Ok(Self { intervals })
    }

    /// Number of indices covered.
    pub fn len(&self) -> usize {
        self.intervals.last().map_or(0, |iv| iv.last + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The rule covering `index` and the offset of `index` inside its interval.
    pub fn lookup(&self, index: usize) -> Option<(Placement, usize)> {
        let pos = self.intervals.partition_point(|iv| iv.last < index);
        let iv = self.intervals.get(pos)?;
        (iv.first <= index).then(|| (iv.rule, index - iv.first))
    }
}

/// Computes the coordinates of every node for one scenario.
#[derive(Debug, Clone)]
pub struct PositionModel {
    layout: LayoutConfig,
    endpoints: [Position; 2],
    table: PlacementTable,
}

impl PositionModel {
    pub fn new(config: &TopologyConfig) -> Result<Self> {
        config.validate()?;
        let n = config.ordinary_nodes;
        let bottom = config.layout.bottom_row_nodes;
        let top = config.top_row_nodes();
        let table = PlacementTable::new(vec![
            (0..=0, Placement::Origin),
            (1..=bottom, Placement::BottomRow),
            (bottom + 1..=bottom + top, Placement::TopRow),
            (n - 1..=n - 1, Placement::Terminus),
            (n..=n + 1, Placement::TunnelEndpoint),
        ])?;
        let model = Self {
            layout: config.layout.clone(),
            endpoints: config.scenario.endpoint_positions(&config.layout),
            table,
        };
        model.check_scenario(config)?;
        Ok(model)
    }

    pub fn node_count(&self) -> usize {
        self.table.len()
    }

    /// Position of node `index`. Unknown indices are reported and leave the
    /// position undefined.
    pub fn position(&self, index: usize) -> Result<Position> {
        let Some((rule, offset)) = self.table.lookup(index) else {
            warn!(
                index,
                count = self.node_count(),
                "position requested for index outside the topology"
            );
            return Err(SimError::OutOfRangeIndex {
                index,
                count: self.node_count(),
            });
        };
        let l = &self.layout;
        let o = l.origin;
        let step = (offset + 1) as f64;
        Ok(match rule {
            Placement::Origin => o,
            Placement::BottomRow => {
                Position::new(o.x + l.bottom_separation * step, o.y + l.bottom_offset)
            }
            Placement::TopRow => Position::new(o.x + l.top_separation * step, o.y - l.top_offset),
            Placement::Terminus => Position::new(o.x + l.terminus_offset, o.y),
            Placement::TunnelEndpoint => self.endpoints[offset],
        })
    }

    pub fn positions(&self) -> Result<Vec<Position>> {
        (0..self.node_count()).map(|i| self.position(i)).collect()
    }

    /// Distance from `p` to the closest ordinary node.
    pub fn nearest_ordinary_distance(&self, p: Position, ordinary_nodes: usize) -> Result<f64> {
        let mut best = f64::INFINITY;
        for i in 0..ordinary_nodes {
            best = best.min(self.position(i)?.distance(&p));
        }
        Ok(best)
    }

    /// Enforces what the active scenario promises about endpoint reachability.
    fn check_scenario(&self, config: &TopologyConfig) -> Result<()> {
        let range = config.radio_range;
        match config.scenario {
            Scenario::OutOfRange => {
                for (label, p) in ["W1", "W2"].iter().zip(self.endpoints) {
                    let d = self.nearest_ordinary_distance(p, config.ordinary_nodes)?;
                    if d <= range {
                        return Err(SimError::config(format!(
                            "out-of-range endpoint {label} at {p} is {d:.1} from an ordinary node (radio range {range})"
                        )));
                    }
                }
            }
            Scenario::InRange => {
                let anchors = [config.source(), config.destination()];
                for ((label, p), anchor) in ["W1", "W2"].iter().zip(self.endpoints).zip(anchors) {
                    let d = self.position(anchor)?.distance(&p);
                    if d > range {
                        return Err(SimError::config(format!(
                            "in-range endpoint {label} at {p} is {d:.1} from node {anchor} (radio range {range})"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(scenario: Scenario) -> PositionModel {
        PositionModel::new(&TopologyConfig::default().with_scenario(scenario)).unwrap()
    }

    #[test]
    fn reference_layout() {
        let m = model(Scenario::InRange);
        let expected = [
            (0.0, 30.0),
            (25.0, 42.0),
            (50.0, 42.0),
            (75.0, 42.0),
            (20.0, 5.0),
            (40.0, 5.0),
            (60.0, 5.0),
            (80.0, 5.0),
            (100.0, 30.0),
            (-10.0, 20.0),
            (110.0, 20.0),
        ];
        let got = m.positions().unwrap();
        assert_eq!(got.len(), 11);
        for (i, (p, (x, y))) in got.iter().zip(expected).enumerate() {
            assert_eq!(*p, Position::new(x, y), "node {i}");
        }
    }

    #[test]
    fn only_endpoints_depend_on_scenario() {
        let a = model(Scenario::InRange).positions().unwrap();
        let b = model(Scenario::OutOfRange).positions().unwrap();
        assert_eq!(a[..9], b[..9]);
        assert_ne!(a[9], b[9]);
        assert_ne!(a[10], b[10]);
    }

    #[test]
    fn first_invalid_index_is_reported() {
        let m = model(Scenario::InRange);
        let err = m.position(11).unwrap_err();
        assert!(matches!(err, SimError::OutOfRangeIndex { index: 11, count: 11 }));
        assert!(m.position(usize::MAX).is_err());
    }

    #[test]
    fn endpoint_reachability_matches_scenario() {
        let cfg = TopologyConfig::default();
        let far = model(Scenario::OutOfRange);
        let near = model(Scenario::InRange);
        for idx in cfg.tunnel_endpoints() {
            let d_far = far
                .nearest_ordinary_distance(far.position(idx).unwrap(), 9)
                .unwrap();
            let d_near = near
                .nearest_ordinary_distance(near.position(idx).unwrap(), 9)
                .unwrap();
            assert!(d_far > cfg.radio_range, "W{} at {d_far}", idx - 8);
            assert!(d_near <= cfg.radio_range, "W{} at {d_near}", idx - 8);
        }
    }

    #[test]
    fn table_rejects_gaps_and_overlaps() {
        let gap = PlacementTable::new(vec![
            (0..=0, Placement::Origin),
            (2..=3, Placement::BottomRow),
        ]);
        assert!(gap.unwrap_err().to_string().contains("gap"));

        let overlap = PlacementTable::new(vec![
            (0..=0, Placement::Origin),
            (1..=3, Placement::BottomRow),
            (3..=4, Placement::TopRow),
        ]);
        assert!(overlap.unwrap_err().to_string().contains("overlap"));

        let wide_origin = PlacementTable::new(vec![(0..=1, Placement::Origin)]);
        assert!(wide_origin.is_err());
    }

    #[test]
    fn table_lookup_returns_offsets() {
        let table = PlacementTable::new(vec![
            (0..=0, Placement::Origin),
            (1..=3, Placement::BottomRow),
            (4..=5, Placement::TunnelEndpoint),
        ])
        .unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.lookup(0), Some((Placement::Origin, 0)));
        assert_eq!(table.lookup(3), Some((Placement::BottomRow, 2)));
        assert_eq!(table.lookup(5), Some((Placement::TunnelEndpoint, 1)));
        assert_eq!(table.lookup(6), None);
    }

    #[test]
    fn in_range_scenario_rejects_distant_endpoints() {
        let mut cfg = TopologyConfig::default();
        cfg.layout.endpoint_offset = 40.0;
        let err = PositionModel::new(&cfg).unwrap_err();
        assert!(err.to_string().contains("in-range endpoint W1"));
    }
}
