//! Market-structure pattern detection core
//!
//! Incremental detectors over OHLC candle streams: deviation-zigzag
//! extrema, pivot points, harmonic (Gartley-family) projections,
//! Elliott-Wave impulse classification, and the trade-setup state
//! machines built on top of them. The crate is synchronous and
//! I/O-free; hosts feed bars in through [`bars::BarSource`] and drain
//! [`events::SignalEvent`]s out.

pub mod bars;
pub mod config;
pub mod detect;
pub mod elliott;
pub mod events;
pub mod export;
pub mod gartley;
pub mod point;
pub mod setup;

// Re-export commonly used types
pub use bars::{BarSource, Candle, CandleSeries, TimeframeId};
pub use config::{HarmonicConfig, ImpulseConfig, SetupConfig, TriangleConfig};
pub use detect::{ExtremumDetector, PivotDetector};
pub use elliott::ImpulseClassifier;
pub use events::SignalEvent;
pub use gartley::{GartleyItem, GartleyPatternKind, HarmonicProjectionEngine};
pub use point::BarPoint;
pub use setup::{SetupStateMachine, TriangleSetupMachine};
