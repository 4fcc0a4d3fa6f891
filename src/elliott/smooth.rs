//! Candle-level smoothness check
//!
//! An alternative, wave-agnostic way to qualify a movement as
//! impulsive: instead of resolving sub-waves, look at how tightly the
//! candles are packed. A smooth impulse has no significant corrections
//! and progresses either as a straight line or as a hysteresis loop
//! (slow start, fast middle, slow end).

use crate::bars::BarSource;
use crate::point::BarPoint;

/// Maximum drawdown from the running extreme, as a fraction of the
/// total movement.
const MAX_CORRECTION_DEPTH: f64 = 0.35;

/// Maximum close-to-close path length over straight-line distance.
/// Close to 1.0 means perfectly smooth.
const MAX_PATH_EFFICIENCY_RATIO: f64 = 2.0;

/// Line shape: price contribution band for each third of the movement.
const LINE_THIRD_MIN_CONTRIBUTION: f64 = 0.15;
const LINE_THIRD_MAX_CONTRIBUTION: f64 = 0.55;

/// Hysteresis shape: minimum contribution of the middle third and
/// maximum imbalance between the edge thirds.
const HYSTERESIS_MIDDLE_MIN_CONTRIBUTION: f64 = 0.45;
const HYSTERESIS_EDGE_MAX_RATIO: f64 = 3.0;

/// Minimum drawdown fraction that counts as a correction episode.
const ZIGZAG_EPISODE_THRESHOLD: f64 = 0.12;

/// Correction episodes allowed before the movement reads as a zigzag.
const MAX_CORRECTION_EPISODES: usize = 1;

/// Per-bar roughness imbalance allowed between the two halves.
const MAX_ROUGHNESS_RATIO: f64 = 3.5;

/// Roughness below this never triggers the imbalance check.
const MIN_ROUGHNESS_FOR_RATIO_CHECK: f64 = 0.02;

/// Whether the movement between `start` and `end` is a smooth impulse.
///
/// Returns `false` on fewer than 3 bars or a zero-length movement.
pub fn is_smooth_impulse(source: &dyn BarSource, start: &BarPoint, end: &BarPoint) -> bool {
    let bar_count = end.bar_index - start.bar_index;
    if bar_count < 3 {
        return false;
    }

    let is_up = end.value > start.value;
    let total_movement = (end.value - start.value).abs();
    if total_movement < f64::EPSILON {
        return false;
    }

    // Start and end must be the extremes of the whole movement. A bar
    // outside the start-end range means a truncated or mislabeled leg.
    if !extremes_valid(source, start, end, is_up, total_movement) {
        return false;
    }

    if max_correction_depth(source, start, end, is_up) / total_movement > MAX_CORRECTION_DEPTH {
        return false;
    }

    if path_efficiency_ratio(source, start, end) > MAX_PATH_EFFICIENCY_RATIO {
        return false;
    }

    if is_zigzag_like(source, start, end, is_up, total_movement) {
        return false;
    }

    if has_uneven_corrections(source, start, end, is_up, total_movement) {
        return false;
    }

    let (first, second, third) = thirds_contribution(source, start, end, is_up, total_movement);
    is_line_shape(first, second, third) || is_hysteresis_shape(first, second, third)
}

fn extremes_valid(
    source: &dyn BarSource,
    start: &BarPoint,
    end: &BarPoint,
    is_up: bool,
    total_movement: f64,
) -> bool {
    let tolerance = total_movement * 0.001;

    for i in start.bar_index..=end.bar_index {
        let high = source.high(i);
        let low = source.low(i);

        if is_up {
            if low < start.value - tolerance || high > end.value + tolerance {
                return false;
            }
        } else if high > start.value + tolerance || low < end.value - tolerance {
            return false;
        }
    }

    true
}

/// Maximum drawdown from the running extreme, in price units.
fn max_correction_depth(
    source: &dyn BarSource,
    start: &BarPoint,
    end: &BarPoint,
    is_up: bool,
) -> f64 {
    let mut running_extreme = start.value;
    let mut max_drawdown: f64 = 0.0;

    for i in start.bar_index..=end.bar_index {
        let high = source.high(i);
        let low = source.low(i);

        if is_up {
            running_extreme = running_extreme.max(high);
            max_drawdown = max_drawdown.max(running_extreme - low);
        } else {
            running_extreme = running_extreme.min(low);
            max_drawdown = max_drawdown.max(high - running_extreme);
        }
    }

    max_drawdown
}

/// Total close-to-close path length over the straight-line distance.
fn path_efficiency_ratio(source: &dyn BarSource, start: &BarPoint, end: &BarPoint) -> f64 {
    let straight_distance = (end.value - start.value).abs();
    if straight_distance < f64::EPSILON {
        return f64::MAX;
    }

    let mut path_length = 0.0;
    let mut prev_price = start.value;

    for i in start.bar_index + 1..=end.bar_index {
        let curr_price = if i < end.bar_index {
            source.close(i)
        } else {
            end.value
        };
        path_length += (curr_price - prev_price).abs();
        prev_price = curr_price;
    }

    path_length / straight_distance
}

/// Fraction of total progress contributed by each third of the
/// movement, bars divided into three equal segments.
fn thirds_contribution(
    source: &dyn BarSource,
    start: &BarPoint,
    end: &BarPoint,
    is_up: bool,
    total_movement: f64,
) -> (f64, f64, f64) {
    let start_index = start.bar_index;
    let bar_count = end.bar_index - start_index;

    let first_boundary = source.close(start_index + bar_count / 3);
    let second_boundary = source.close(start_index + 2 * bar_count / 3);

    let sign = if is_up { 1.0 } else { -1.0 };
    let first = sign * (first_boundary - start.value) / total_movement;
    let second = sign * (second_boundary - first_boundary) / total_movement;
    let third = sign * (end.value - second_boundary) / total_movement;

    (first, second, third)
}

fn is_line_shape(first: f64, second: f64, third: f64) -> bool {
    let in_band = |v: f64| (LINE_THIRD_MIN_CONTRIBUTION..=LINE_THIRD_MAX_CONTRIBUTION).contains(&v);
    in_band(first) && in_band(second) && in_band(third)
}

fn is_hysteresis_shape(first: f64, second: f64, third: f64) -> bool {
    if second < HYSTERESIS_MIDDLE_MIN_CONTRIBUTION {
        return false;
    }
    if first < 0.0 || third < 0.0 {
        return false;
    }

    let edge_min = first.min(third);
    let edge_max = first.max(third);

    if edge_min < f64::EPSILON {
        return edge_max < 0.1;
    }

    edge_max / edge_min <= HYSTERESIS_EDGE_MAX_RATIO
}

/// Counts distinct correction episodes where drawdown from the running
/// extreme exceeds the episode threshold.
fn is_zigzag_like(
    source: &dyn BarSource,
    start: &BarPoint,
    end: &BarPoint,
    is_up: bool,
    total_movement: f64,
) -> bool {
    let mut episodes = 0usize;
    let mut in_correction = false;
    let mut running_extreme = start.value;

    for i in start.bar_index..=end.bar_index {
        let high = source.high(i);
        let low = source.low(i);

        let main_price = if is_up { high } else { low };
        let counter_price = if is_up { low } else { high };

        if (is_up && main_price > running_extreme) || (!is_up && main_price < running_extreme) {
            running_extreme = main_price;
        }

        let drawdown = (running_extreme - counter_price).abs() / total_movement;
        if drawdown > ZIGZAG_EPISODE_THRESHOLD {
            if !in_correction {
                episodes += 1;
                in_correction = true;
            }
        } else {
            in_correction = false;
        }
    }

    episodes > MAX_CORRECTION_EPISODES
}

/// Compares per-bar roughness of the two halves of the movement.
fn has_uneven_corrections(
    source: &dyn BarSource,
    start: &BarPoint,
    end: &BarPoint,
    is_up: bool,
    total_movement: f64,
) -> bool {
    let start_index = start.bar_index;
    let end_index = end.bar_index;
    let bar_count = end_index - start_index;
    if bar_count < 6 {
        return false;
    }

    let mid_index = start_index + bar_count / 2;

    let first_roughness = segment_roughness(source, start_index, mid_index, is_up);
    let second_roughness = segment_roughness(source, mid_index, end_index, is_up);

    let first_len = (mid_index - start_index) as f64;
    let second_len = (end_index - mid_index) as f64;

    let first_norm = first_roughness / (first_len * total_movement);
    let second_norm = second_roughness / (second_len * total_movement);

    let max_norm = first_norm.max(second_norm);
    let min_norm = first_norm.min(second_norm);

    if max_norm < MIN_ROUGHNESS_FOR_RATIO_CHECK {
        return false;
    }
    if min_norm < f64::EPSILON {
        return max_norm > MIN_ROUGHNESS_FOR_RATIO_CHECK;
    }

    max_norm / min_norm > MAX_ROUGHNESS_RATIO
}

/// Total counter-direction close-to-close movement within a segment.
fn segment_roughness(source: &dyn BarSource, from_index: i64, to_index: i64, is_up: bool) -> f64 {
    let mut roughness = 0.0;

    for i in from_index + 1..=to_index {
        let change = source.close(i) - source.close(i - 1);
        if (is_up && change < 0.0) || (!is_up && change > 0.0) {
            roughness += change.abs();
        }
    }

    roughness
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{Candle, CandleSeries, TimeframeId};
    use chrono::{TimeZone, Utc};

    fn doji_series(values: &[f64]) -> CandleSeries {
        let candles = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let t = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
                Candle::new(v, v, v, v, t)
            })
            .collect();
        CandleSeries::from_candles(TimeframeId::M1, candles)
    }

    fn point(values: &[f64], index: i64) -> BarPoint {
        let t = Utc.timestamp_opt(1_700_000_000 + index * 60, 0).unwrap();
        BarPoint::new(values[index as usize], t, index, TimeframeId::M1)
    }

    #[test]
    fn steady_ramp_is_smooth() {
        let values: Vec<f64> = (0..10).map(|i| 100.0 + f64::from(i)).collect();
        let series = doji_series(&values);
        assert!(is_smooth_impulse(
            &series,
            &point(&values, 0),
            &point(&values, 9)
        ));
    }

    #[test]
    fn hysteresis_shape_is_smooth() {
        // Slow start, fast middle, slow end.
        let values = vec![
            100.0, 100.4, 100.8, 101.1, 101.5, // first third: +1.5
            103.5, 106.0, 108.5, 110.5, // middle third: +9.0
            111.0, 111.5, 111.8, 112.0, // last third: +1.5
        ];
        let series = doji_series(&values);
        assert!(is_smooth_impulse(
            &series,
            &point(&values, 0),
            &point(&values, 12)
        ));
    }

    #[test]
    fn deep_pullback_is_rejected() {
        // 110 -> 104 retraces half the total movement.
        let values = vec![
            100.0, 103.0, 106.0, 110.0, 107.0, 104.0, 107.0, 110.0, 112.0,
        ];
        let series = doji_series(&values);
        assert!(!is_smooth_impulse(
            &series,
            &point(&values, 0),
            &point(&values, 8)
        ));
    }

    #[test]
    fn truncated_end_is_rejected() {
        // Bar 6 trades above the claimed end of the movement.
        let values = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0, 113.0, 111.0, 110.0];
        let series = doji_series(&values);
        assert!(!is_smooth_impulse(
            &series,
            &point(&values, 0),
            &point(&values, 8)
        ));
    }

    #[test]
    fn too_few_bars_is_rejected() {
        let values = vec![100.0, 103.0, 106.0];
        let series = doji_series(&values);
        assert!(!is_smooth_impulse(
            &series,
            &point(&values, 0),
            &point(&values, 2)
        ));
    }
}
