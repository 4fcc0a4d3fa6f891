//! Harmonic (Gartley-family) pattern recognition
//!
//! Eight XABCD patterns described by Fibonacci ratio tables. Candidate
//! projections are seeded from pivot-point X-A pairs and refined candle
//! by candle until a full pattern forms or the projection is invalidated.

mod engine;
mod projection;

pub use engine::HarmonicProjectionEngine;
pub use projection::GartleyProjection;

use serde::{Deserialize, Serialize};

use crate::point::BarPoint;

/// Fibonacci ratio ladder shared by all pattern range definitions.
pub const LEVELS: [f64; 17] = [
    0.236, 0.382, 0.5, 0.618, 0.707, 0.786, 0.886, 1.0, 1.13, 1.272, 1.41, 1.618, 2.0, 2.24,
    2.618, 3.14, 3.618,
];

/// Slice of the ladder between `start` and `end` inclusive.
pub fn ladder_range(start: f64, end: f64) -> Vec<f64> {
    LEVELS
        .iter()
        .copied()
        .skip_while(|v| *v < start)
        .take_while(|v| *v <= end)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GartleyPatternKind {
    Gartley,
    Butterfly,
    Shark,
    Crab,
    DeepCrab,
    Bat,
    AltBat,
    Cypher,
}

impl std::fmt::Display for GartleyPatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Gartley => "GARTLEY",
            Self::Butterfly => "BUTTERFLY",
            Self::Shark => "SHARK",
            Self::Crab => "CRAB",
            Self::DeepCrab => "DEEP CRAB",
            Self::Bat => "BAT",
            Self::AltBat => "ALT BAT",
            Self::Cypher => "CYPHER",
        };
        f.write_str(name)
    }
}

/// Which leg the stop/take ladder is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GartleySetupType {
    Ad,
    Cd,
}

/// Ratio tables for one pattern. An empty `xb` table means the B point
/// is unconstrained (shark).
#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub kind: GartleyPatternKind,
    pub xb: Vec<f64>,
    pub xd: Vec<f64>,
    pub bd: Vec<f64>,
    pub ac: Vec<f64>,
    pub setup_type: GartleySetupType,
}

/// The full supported pattern table.
pub fn pattern_table() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            kind: GartleyPatternKind::Gartley,
            xb: vec![0.618],
            xd: vec![0.786],
            bd: ladder_range(1.13, 1.618),
            ac: ladder_range(0.382, 0.886),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::Butterfly,
            xb: vec![0.786],
            xd: ladder_range(1.27, 1.41),
            bd: ladder_range(1.618, 2.24),
            ac: ladder_range(0.382, 0.886),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::Shark,
            xb: Vec::new(),
            xd: ladder_range(0.886, 1.13),
            bd: ladder_range(1.618, 2.24),
            ac: ladder_range(1.13, 1.618),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::Crab,
            xb: ladder_range(0.382, 0.618),
            xd: vec![1.618],
            bd: ladder_range(2.618, 3.618),
            ac: ladder_range(0.382, 0.886),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::DeepCrab,
            xb: vec![0.886],
            xd: vec![1.618],
            bd: ladder_range(2.0, 3.618),
            ac: ladder_range(0.382, 0.886),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::Bat,
            xb: ladder_range(0.382, 0.5),
            xd: vec![0.886],
            bd: ladder_range(1.618, 2.618),
            ac: ladder_range(0.382, 0.886),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::AltBat,
            xb: vec![0.382],
            xd: vec![1.13],
            bd: ladder_range(2.0, 3.618),
            ac: ladder_range(0.382, 0.886),
            setup_type: GartleySetupType::Ad,
        },
        PatternSpec {
            kind: GartleyPatternKind::Cypher,
            xb: ladder_range(0.382, 0.618),
            xd: vec![0.786],
            bd: ladder_range(1.272, 2.0),
            ac: ladder_range(1.13, 1.41),
            setup_type: GartleySetupType::Cd,
        },
    ]
}

/// Result of feeding one more candle into a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionState {
    /// No viable projection (or the projection was cancelled).
    NoProjection,
    /// X-A-B-C is in place, a D window exists.
    ProjectionFormed,
    /// The projection is unchanged since the previous update.
    ProjectionSame,
    /// All five points are in place and the pattern fits for trade.
    PatternFormed,
    /// The formed pattern is unchanged since the previous update.
    PatternSame,
}

/// A Fibonacci ratio mapped onto an actual price band. `start` is the
/// band edge closer to the counting point, `end` the wick-allowance edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealLevel {
    pub ratio: f64,
    pub start: f64,
    pub end: f64,
}

impl RealLevel {
    pub fn new(ratio: f64, start: f64, end: f64) -> Self {
        Self { ratio, start, end }
    }

    pub fn min(&self) -> f64 {
        self.start.min(self.end)
    }

    pub fn max(&self) -> f64 {
        self.start.max(self.end)
    }
}

/// Intersection of one X-D band with one B-D band; the D point must land
/// inside both at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealLevelCombo {
    pub xd: RealLevel,
    pub bd: RealLevel,
    pub min: f64,
    pub max: f64,
}

impl RealLevelCombo {
    pub fn new(xd: RealLevel, bd: RealLevel) -> Self {
        Self {
            xd,
            bd,
            min: xd.min().max(bd.min()),
            max: xd.max().min(bd.max()),
        }
    }

    /// Empty intersections are useless and should be dropped.
    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }
}

/// A fully formed XABCD pattern with its trade levels and the per-leg
/// ratio fit.
#[derive(Debug, Clone, Serialize)]
pub struct GartleyItem {
    pub accuracy_percent: u32,
    pub kind: GartleyPatternKind,
    pub item_x: BarPoint,
    pub item_a: BarPoint,
    pub item_b: BarPoint,
    pub item_c: BarPoint,
    pub item_d: BarPoint,
    pub stop_loss: f64,
    pub take_profit1: f64,
    pub take_profit2: f64,
    pub xd_actual: f64,
    pub xd: f64,
    pub ac_actual: f64,
    pub ac: f64,
    pub bd_actual: f64,
    pub bd: f64,
    pub xb_actual: f64,
    pub xb: f64,
}

impl GartleyItem {
    pub fn is_bull(&self) -> bool {
        self.item_x.value < self.item_a.value
    }

    /// The stop-to-take range.
    pub fn range(&self) -> f64 {
        (self.stop_loss - self.take_profit1).abs()
    }

    pub fn profit_ratio(&self, now_price: f64) -> f64 {
        (self.take_profit1 - now_price).abs() / self.range()
    }

    /// Two items describe the same pattern when all five points match.
    pub fn same_as(&self, other: &GartleyItem) -> bool {
        self.item_x.same_point(&other.item_x)
            && self.item_a.same_point(&other.item_a)
            && self.item_b.same_point(&other.item_b)
            && self.item_c.same_point(&other.item_c)
            && self.item_d.same_point(&other.item_d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_range_is_inclusive() {
        assert_eq!(ladder_range(1.13, 1.618), vec![1.13, 1.272, 1.41, 1.618]);
        assert_eq!(ladder_range(0.382, 0.5), vec![0.382, 0.5]);
        // A start value between rungs snaps to the next rung up.
        assert_eq!(ladder_range(1.27, 1.41), vec![1.272, 1.41]);
    }

    #[test]
    fn pattern_table_shapes() {
        let table = pattern_table();
        assert_eq!(table.len(), 8);

        let shark = table
            .iter()
            .find(|p| p.kind == GartleyPatternKind::Shark)
            .unwrap();
        assert!(shark.xb.is_empty());

        let cypher = table
            .iter()
            .find(|p| p.kind == GartleyPatternKind::Cypher)
            .unwrap();
        assert_eq!(cypher.setup_type, GartleySetupType::Cd);
        assert_eq!(cypher.bd, vec![1.272, 1.41, 1.618, 2.0]);
    }

    #[test]
    fn combo_intersection() {
        let xd = RealLevel::new(0.886, 110.0, 97.0);
        let bd = RealLevel::new(2.0, 118.0, 105.0);
        let combo = RealLevelCombo::new(xd, bd);
        assert!(!combo.is_empty());
        assert_eq!(combo.min, 105.0);
        assert_eq!(combo.max, 110.0);

        let far = RealLevel::new(3.618, 90.0, 80.0);
        assert!(RealLevelCombo::new(xd, far).is_empty());
    }
}
