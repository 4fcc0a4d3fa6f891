//! Elliott-Wave impulse classification
//!
//! Two independent checks over a candidate leg between two bar points:
//! the wave-rule classifier (`ImpulseClassifier`), which re-detects the
//! leg's sub-structure at progressively finer deviation scales and
//! validates the canonical 5-wave rules, and the candle-level smoothness
//! check (`smooth::is_smooth_impulse`), which looks only at drawdown,
//! path efficiency and price-progress shape. Callers pick which check(s)
//! to require.

mod impulse;
pub mod smooth;

pub use impulse::ImpulseClassifier;

use crate::point::BarPoint;

/// Sub-structure classification of a corrective wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CorrectionKind {
    /// No resolvable internal structure at the scanned scales.
    Simple,
    /// Resolves to a 4-point A-B-C zigzag.
    Zigzag,
    /// Two zigzags joined by an overlapping connector.
    DoubleZigzag,
}

/// Coarse structural verdict an external model can give for a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveStructure {
    Impulse,
    Zigzag,
    DoubleZigzag,
}

/// Optional external model consulted when the wave rules alone cannot
/// resolve a leg. Implementations live outside the core; `None` means
/// "no opinion" and the rule verdict stands.
pub trait PatternOracle {
    fn predict(&self, start: &BarPoint, end: &BarPoint) -> Option<WaveStructure>;
}

/// A successfully classified 5-wave impulse: the six wave boundary
/// points plus the sub-structure kinds of the two corrective waves.
/// Produced per classification call, never retained by the classifier.
#[derive(Debug, Clone)]
pub struct ImpulseResult {
    pub wave0: BarPoint,
    pub wave1: BarPoint,
    pub wave2: BarPoint,
    pub wave3: BarPoint,
    pub wave4: BarPoint,
    pub wave5: BarPoint,
    pub wave2_kind: CorrectionKind,
    pub wave4_kind: CorrectionKind,
}

impl ImpulseResult {
    pub fn is_up(&self) -> bool {
        self.wave5.value > self.wave0.value
    }

    /// The six boundary points in time order.
    pub fn waves(&self) -> Vec<BarPoint> {
        vec![
            self.wave0.clone(),
            self.wave1.clone(),
            self.wave2.clone(),
            self.wave3.clone(),
            self.wave4.clone(),
            self.wave5.clone(),
        ]
    }
}
