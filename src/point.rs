//! Price/time/index points produced by the detectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bars::TimeframeId;

/// A confirmed or in-flight turning point on the chart.
///
/// Ordering and equality are *price ordering, not structural ordering*:
/// two points compare solely by `value` (with `f64::EPSILON` equality),
/// never by `open_time` or `bar_index`. Callers that need time ordering
/// must compare `open_time` explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarPoint {
    /// Price of the extremum.
    pub value: f64,
    /// Open time of the bar carrying this extremum.
    pub open_time: DateTime<Utc>,
    /// Index of the bar in its source series.
    pub bar_index: i64,
    /// Timeframe of the source series.
    pub timeframe: TimeframeId,
}

impl BarPoint {
    pub fn new(value: f64, open_time: DateTime<Utc>, bar_index: i64, timeframe: TimeframeId) -> Self {
        Self {
            value,
            open_time,
            bar_index,
            timeframe,
        }
    }

    /// Same point on the chart: same price (within epsilon) and same bar.
    pub fn same_point(&self, other: &BarPoint) -> bool {
        self == other && self.open_time == other.open_time
    }
}

impl PartialEq for BarPoint {
    fn eq(&self, other: &Self) -> bool {
        (self.value - other.value).abs() < f64::EPSILON
    }
}

impl PartialOrd for BarPoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self == other {
            return Some(std::cmp::Ordering::Equal);
        }
        self.value.partial_cmp(&other.value)
    }
}

/// A price movement between two bar points. Always derived, never stored.
#[derive(Debug, Clone, Copy)]
pub struct Leg<'a> {
    pub start: &'a BarPoint,
    pub end: &'a BarPoint,
}

impl<'a> Leg<'a> {
    pub fn new(start: &'a BarPoint, end: &'a BarPoint) -> Self {
        Self { start, end }
    }

    pub fn is_up(&self) -> bool {
        self.end.value > self.start.value
    }

    pub fn length(&self) -> f64 {
        (self.end.value - self.start.value).abs()
    }

    /// Elapsed bars from start to end.
    pub fn bar_count(&self) -> i64 {
        self.end.bar_index - self.start.bar_index
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end.open_time - self.start.open_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(value: f64, index: i64) -> BarPoint {
        let t = Utc.timestamp_opt(1_700_000_000 + index * 60, 0).unwrap();
        BarPoint::new(value, t, index, TimeframeId::M1)
    }

    #[test]
    fn ordering_ignores_time_and_index() {
        let early_high = point(110.0, 1);
        let late_low = point(100.0, 50);
        assert!(late_low < early_high);
        assert!(early_high > late_low);
    }

    #[test]
    fn equality_is_price_only() {
        let a = point(100.0, 1);
        let b = point(100.0, 99);
        assert_eq!(a, b);
        assert!(!a.same_point(&b));
    }

    #[test]
    fn leg_direction_and_length() {
        let start = point(100.0, 0);
        let end = point(110.0, 20);
        let leg = Leg::new(&start, &end);
        assert!(leg.is_up());
        assert_eq!(leg.length(), 10.0);
        assert_eq!(leg.bar_count(), 20);
    }
}
