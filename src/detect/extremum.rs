//! Deviation-threshold zigzag detector

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::bars::BarSource;
use crate::point::BarPoint;

/// Ordered, time-keyed sequence of turning points. Insertion order equals
/// time order; confirmed entries strictly alternate direction. The last
/// entry may be the still-open candidate, which is replaced in place while
/// price keeps extending.
pub type ExtremumSeries = BTreeMap<DateTime<Utc>, BarPoint>;

/// Incremental deviation-based zigzag detector.
///
/// Maintains one candidate turning point and a direction. While price
/// extends in the current direction the candidate is moved; once price
/// retraces more than `scale_rate * 0.01%` of the candidate's value, the
/// candidate is confirmed, the direction flips and a new candidate opens
/// at the retracement extreme. A total function of its input stream: it
/// never fails, it only produces fewer or more extrema.
#[derive(Debug, Clone)]
pub struct ExtremumDetector {
    scale_rate: u32,
    is_up: bool,
    current: Option<BarPoint>,
    current_key: Option<DateTime<Utc>>,
    extrema: ExtremumSeries,
}

impl ExtremumDetector {
    /// `scale_rate` is the retracement threshold in hundredths of a
    /// percent: 100 means 1%.
    pub fn new(scale_rate: u32) -> Self {
        Self::with_direction(scale_rate, false)
    }

    pub fn with_direction(scale_rate: u32, is_up: bool) -> Self {
        Self {
            scale_rate,
            is_up,
            current: None,
            current_key: None,
            extrema: BTreeMap::new(),
        }
    }

    pub fn scale_rate(&self) -> u32 {
        self.scale_rate
    }

    /// Read-only view over the confirmed extrema plus the open tail.
    pub fn extrema(&self) -> &ExtremumSeries {
        &self.extrema
    }

    pub fn to_list(&self) -> Vec<BarPoint> {
        self.extrema.values().cloned().collect()
    }

    /// The in-flight, not-yet-confirmed extremum.
    pub fn current(&self) -> Option<&BarPoint> {
        self.current.as_ref()
    }

    pub fn reset(&mut self, is_up: bool) {
        self.extrema.clear();
        self.current = None;
        self.current_key = None;
        self.is_up = is_up;
    }

    /// Price that, once crossed against the current direction, confirms
    /// the candidate.
    fn deviation_price(&self, candidate: &BarPoint) -> f64 {
        let rate = f64::from(self.scale_rate) * 1e-4;
        let signed = if self.is_up { -rate } else { rate };
        candidate.value * (1.0 + signed)
    }

    /// Replace the open tail entry with a stronger point in the same direction.
    fn move_extremum(&mut self, point: BarPoint) {
        if let Some(key) = self.current_key.take() {
            self.extrema.remove(&key);
        }
        self.set_inner(point);
    }

    /// Confirm the tail and open a new candidate at `point`.
    fn set_extremum(&mut self, point: BarPoint) {
        self.set_inner(point);
    }

    fn set_inner(&mut self, point: BarPoint) {
        self.current_key = Some(point.open_time);
        self.extrema.insert(point.open_time, point.clone());
        self.current = Some(point);
    }

    /// Consume the bar at `index`. Fewer than 2 bars is a no-op.
    pub fn calculate(&mut self, source: &dyn BarSource, index: i64) {
        if source.count() < 2 || index < 0 || index >= source.count() {
            return;
        }

        let low = source.low(index);
        let high = source.high(index);
        let timeframe = source.timeframe();
        let open_time = source.open_time(index);

        let Some(candidate) = self.current.clone() else {
            // Seed the first candidate from the first high seen.
            self.set_inner(BarPoint::new(high, open_time, index, timeframe));
            return;
        };
        let deviation = self.deviation_price(&candidate);

        if self.is_up {
            if high >= candidate.value {
                self.move_extremum(BarPoint::new(high, open_time, index, timeframe));
            } else if low <= deviation {
                self.set_extremum(BarPoint::new(low, open_time, index, timeframe));
                self.is_up = false;
            }
        } else if low <= candidate.value {
            self.move_extremum(BarPoint::new(low, open_time, index, timeframe));
        } else if high >= deviation {
            self.set_extremum(BarPoint::new(high, open_time, index, timeframe));
            self.is_up = true;
        }
    }

    /// Run the detector over `[start_index, end_index]` inclusive.
    pub fn calculate_range(&mut self, source: &dyn BarSource, start_index: i64, end_index: i64) {
        for index in start_index..=end_index {
            self.calculate(source, index);
        }
    }

    /// Drop the oldest confirmed entries so at most `max_entries` remain.
    /// The still-open tail entry is never removed.
    pub fn prune(&mut self, max_entries: usize) {
        while self.extrema.len() > max_entries {
            let oldest = match self.extrema.keys().next().copied() {
                Some(key) => key,
                None => return,
            };
            if Some(oldest) == self.current_key {
                return;
            }
            self.extrema.remove(&oldest);
        }
    }
}
