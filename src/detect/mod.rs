//! Incremental turning-point detectors
//!
//! Two parameterizations of the same idea: `ExtremumDetector` confirms a
//! reversal once price retraces a continuous deviation threshold (dense
//! zigzags), `PivotDetector` confirms a bar that dominates a fixed
//! symmetric window (sparse structural points).

pub mod extremum;
pub mod pivot;

pub use extremum::{ExtremumDetector, ExtremumSeries};
pub use pivot::PivotDetector;
