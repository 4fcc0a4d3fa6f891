//! Trade-setup state machines
//!
//! One machine instance per (symbol, timeframe) stream. Each machine
//! runs a bank of extremum detectors from coarse to fine scale, searches
//! their recent extrema for a qualifying pattern, and tracks at most one
//! active setup at a time. Signals are queued and drained by the host
//! after each call.

mod machine;
mod triangle;

pub use machine::{SetupState, SetupStateMachine};
pub use triangle::TriangleSetupMachine;
