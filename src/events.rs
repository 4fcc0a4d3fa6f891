//! Signal events emitted by the setup machines
//!
//! Events are pushed into a per-machine queue and drained by the host
//! after each `calculate()`/`on_tick()` call. No callbacks: the host
//! pulls results and decides what to do with them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::point::BarPoint;

/// One emitted trade signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignalEvent {
    /// A validated setup was entered.
    Enter {
        id: Uuid,
        /// Entry level (the retracement trigger, snapped to the traded price).
        level: BarPoint,
        take_profit: BarPoint,
        stop_loss: BarPoint,
        /// Known wave boundary points of the driving leg (at least start and end).
        waves: Vec<BarPoint>,
        /// Earlier extremum that proved the driving leg initial, when one
        /// exists. Hosts use it as the left edge when rendering the setup.
        view_anchor: Option<BarPoint>,
    },
    /// The active setup's stop was hit.
    StopLoss { level: BarPoint, trigger: BarPoint },
    /// The active setup's target was hit.
    TakeProfit { level: BarPoint, trigger: BarPoint },
}

impl SignalEvent {
    pub fn is_enter(&self) -> bool {
        matches!(self, SignalEvent::Enter { .. })
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, SignalEvent::StopLoss { .. } | SignalEvent::TakeProfit { .. })
    }
}
