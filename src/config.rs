//! Configuration for the detectors and setup machines

use serde::{Deserialize, Serialize};

/// Configuration for the impulse trade-setup state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Coarsest extremum scale rate tried first (deviation in 0.01%).
    pub max_scale: u32,
    /// Finest extremum scale rate tried last.
    pub min_scale: u32,
    /// Step between tried scale rates.
    pub scale_step: u32,
    /// Retracement ratio of the leg that triggers an entry.
    pub trigger_ratio: f64,
    /// Shallower ratio that arms the per-tick fast path.
    pub pre_trigger_ratio: f64,
    /// Take-profit target as a multiple of the leg length.
    pub take_ratio: f64,
    /// Minimum bars between the leg's start and end extrema.
    pub min_bars_in_impulse: i64,
    /// How many bars backwards the deep rewind may search.
    pub bars_depth: i64,
    /// Maximum confirmed extrema retained per detector.
    pub extrema_max: usize,
    /// Stop-loss padding beyond the leg start, percent of the distance to entry.
    pub sl_allowance_percent: f64,
    /// Take-profit padding short of the target, percent of the distance to entry.
    pub tp_allowance_percent: f64,
    /// Wave-2/wave-4 duration harmony band, percent (see `ImpulseConfig`).
    pub correction_allowance_percent: f64,
    /// Require the candle-level smoothness check in addition to wave rules.
    pub require_smooth: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            max_scale: 50,
            min_scale: 30,
            scale_step: 5,
            trigger_ratio: 0.5,
            pre_trigger_ratio: 0.4,
            take_ratio: 1.0,
            min_bars_in_impulse: 2,
            bars_depth: 100,
            extrema_max: 100,
            sl_allowance_percent: 2.0,
            tp_allowance_percent: 0.0,
            correction_allowance_percent: 350.0,
            require_smooth: false,
        }
    }
}

/// Configuration for the Elliott-Wave impulse classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpulseConfig {
    /// Wave-2/wave-4 duration harmony band: the wave4/wave2 duration ratio
    /// must stay within [100/percent, percent/100].
    pub correction_allowance_percent: f64,
    /// Finest deviation scale used when zooming into sub-structure.
    pub zoom_min: u32,
    /// Scale decrement per zoom step.
    pub zoom_step: u32,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        Self {
            correction_allowance_percent: 350.0,
            zoom_min: 1,
            zoom_step: 1,
        }
    }
}

/// Configuration for the harmonic (Gartley-family) projection engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicConfig {
    /// Minimum weighted ratio accuracy (0..1) for an emitted pattern.
    pub accuracy: f64,
    /// Sliding retention horizon in bars for every per-X collection.
    pub bars_depth: i64,
    /// Pivot window half-width used for raw candidate points.
    pub pivot_period: i64,
    /// Wick allowance applied to every ratio band (0..1).
    pub wick_allowance: f64,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            accuracy: 0.85,
            bars_depth: 300,
            pivot_period: 1,
            wick_allowance: 0.175,
        }
    }
}

/// Configuration for the ABCDE triangle setup machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleConfig {
    /// Coarsest extremum scale rate tried first.
    pub max_scale: u32,
    /// Finest extremum scale rate tried last.
    pub min_scale: u32,
    /// Step between tried scale rates.
    pub scale_step: u32,
    /// Tolerance band for the wave-contraction ratio ladder (0..1).
    pub ratio_allowance: f64,
    /// Maximum confirmed extrema retained per detector.
    pub extrema_max: usize,
    /// Minimum bars between the triangle's A and E points.
    pub min_bars: i64,
}

impl Default for TriangleConfig {
    fn default() -> Self {
        Self {
            max_scale: 50,
            min_scale: 30,
            scale_step: 5,
            ratio_allowance: 0.25,
            extrema_max: 100,
            min_bars: 10,
        }
    }
}
