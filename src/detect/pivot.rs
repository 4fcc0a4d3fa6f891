//! Lagging pivot-point detector
//!
//! A bar is a pivot high when no bar within `period` bars on either side
//! has a higher high (pivot lows mirror this on lows). Confirmation lags
//! by `period` bars: feeding bar `i` can only ever confirm bar `i - period`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::bars::BarSource;

/// Finds pivot highs and lows with a fixed look-around window.
///
/// Non-pivot bars are recorded with a NaN placeholder so the value maps
/// stay dense over the calculated range; the getters filter those out.
#[derive(Debug, Clone)]
pub struct PivotDetector {
    period: i64,
    bars_depth_clean: i64,
    high_values: BTreeMap<DateTime<Utc>, f64>,
    low_values: BTreeMap<DateTime<Utc>, f64>,
    high_extrema: BTreeSet<DateTime<Utc>>,
    low_extrema: BTreeSet<DateTime<Utc>>,
    all_extrema: BTreeSet<DateTime<Utc>>,
}

impl PivotDetector {
    pub fn new(period: i64, bars_depth_clean: i64) -> Self {
        Self {
            period,
            bars_depth_clean,
            high_values: BTreeMap::new(),
            low_values: BTreeMap::new(),
            high_extrema: BTreeSet::new(),
            low_extrema: BTreeSet::new(),
            all_extrema: BTreeSet::new(),
        }
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    /// Pivot-high price at `time`, if that bar was confirmed as one.
    pub fn high_value(&self, time: DateTime<Utc>) -> Option<f64> {
        self.high_values
            .get(&time)
            .copied()
            .filter(|v| !v.is_nan())
    }

    /// Pivot-low price at `time`, if that bar was confirmed as one.
    pub fn low_value(&self, time: DateTime<Utc>) -> Option<f64> {
        self.low_values.get(&time).copied().filter(|v| !v.is_nan())
    }

    /// Dense time-keyed map over the calculated range; non-pivot bars
    /// hold NaN.
    pub fn high_values(&self) -> &BTreeMap<DateTime<Utc>, f64> {
        &self.high_values
    }

    pub fn low_values(&self) -> &BTreeMap<DateTime<Utc>, f64> {
        &self.low_values
    }

    pub fn high_extrema(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.high_extrema
    }

    pub fn low_extrema(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.low_extrema
    }

    pub fn all_extrema(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.all_extrema
    }

    pub fn reset(&mut self, period: i64) {
        self.period = period;
        self.high_values.clear();
        self.low_values.clear();
        self.high_extrema.clear();
        self.low_extrema.clear();
        self.all_extrema.clear();
    }

    /// Consume the bar at `index_last`, confirming `index_last - period`
    /// if it qualifies. Returns the confirmed (shifted-left) index, or
    /// `None` while fewer than `2 * period + 1` bars are available.
    pub fn calculate(&mut self, source: &dyn BarSource, index_last: i64) -> Option<i64> {
        if index_last < self.period * 2 || index_last >= source.count() {
            return None;
        }

        let index = index_last - self.period;
        let max = source.high(index);
        let min = source.low(index);

        let mut got_high = true;
        let mut got_low = true;
        for i in (index - self.period)..=(index + self.period) {
            if i == index || i < 0 {
                continue;
            }
            if source.high(i) > max {
                got_high = false;
            }
            if source.low(i) < min {
                got_low = false;
            }
        }

        let time = source.open_time(index);
        self.clean_old(source, index);

        if got_high {
            self.high_values.insert(time, max);
            self.high_extrema.insert(time);
            self.all_extrema.insert(time);
        } else {
            self.high_values.insert(time, f64::NAN);
        }

        if got_low {
            self.low_values.insert(time, min);
            self.low_extrema.insert(time);
            self.all_extrema.insert(time);
        } else {
            self.low_values.insert(time, f64::NAN);
        }

        Some(index)
    }

    /// Run the detector over `[start_index, end_index]` inclusive.
    pub fn calculate_range(&mut self, source: &dyn BarSource, start_index: i64, end_index: i64) {
        for index in start_index..=end_index {
            self.calculate(source, index);
        }
    }

    /// Maintenance pass every `bars_depth_clean` bars: drops everything
    /// older than the depth horizon.
    fn clean_old(&mut self, source: &dyn BarSource, current_index: i64) {
        if current_index <= 0 || current_index % self.bars_depth_clean != 0 {
            return;
        }
        if current_index - self.bars_depth_clean <= 0 {
            return;
        }

        let horizon = source.open_time(current_index);
        self.all_extrema.retain(|t| *t >= horizon);
        self.high_extrema.retain(|t| *t >= horizon);
        self.low_extrema.retain(|t| *t >= horizon);
        self.high_values.retain(|t, _| *t >= horizon);
        self.low_values.retain(|t, _| *t >= horizon);
    }
}
