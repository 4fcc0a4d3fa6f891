//! Projection lifecycle management
//!
//! Seeds projections from pivot X-A pairs, drives them candle by candle
//! and validates formed patterns (clean legs, pivot-aligned inner points,
//! ratio accuracy, workable stop/take levels).

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tracing::debug;

use crate::bars::BarSource;
use crate::config::HarmonicConfig;
use crate::detect::PivotDetector;
use crate::gartley::{
    pattern_table, GartleyItem, GartleyProjection, GartleySetupType, PatternSpec, ProjectionState,
};
use crate::point::BarPoint;

const PIVOT_CLEAN_DEPTH: i64 = 1000;

/// Finds Gartley-family patterns over a live candle feed.
///
/// Owns its pivot detector; callers only feed bar indexes. Internal
/// caches are pruned against a rolling `bars_depth` horizon so memory
/// stays bounded on endless feeds.
pub struct HarmonicProjectionEngine {
    pivots: PivotDetector,
    accuracy: f64,
    bars_depth: i64,
    wick_allowance: f64,
    patterns: Vec<PatternSpec>,
    active: BTreeMap<DateTime<Utc>, Vec<GartleyProjection>>,
    bull_x_to_a: BTreeMap<DateTime<Utc>, DateTime<Utc>>,
    bear_x_to_a: BTreeMap<DateTime<Utc>, DateTime<Utc>>,
    bull_wasted_x: BTreeSet<DateTime<Utc>>,
    bear_wasted_x: BTreeSet<DateTime<Utc>>,
    bull_a_max: BTreeMap<DateTime<Utc>, f64>,
    bear_a_min: BTreeMap<DateTime<Utc>, f64>,
    border: Option<DateTime<Utc>>,
}

impl HarmonicProjectionEngine {
    pub fn new(config: &HarmonicConfig) -> Self {
        Self {
            pivots: PivotDetector::new(config.pivot_period, PIVOT_CLEAN_DEPTH),
            accuracy: config.accuracy,
            bars_depth: config.bars_depth,
            wick_allowance: config.wick_allowance,
            patterns: pattern_table(),
            active: BTreeMap::new(),
            bull_x_to_a: BTreeMap::new(),
            bear_x_to_a: BTreeMap::new(),
            bull_wasted_x: BTreeSet::new(),
            bear_wasted_x: BTreeSet::new(),
            bull_a_max: BTreeMap::new(),
            bear_a_min: BTreeMap::new(),
            border: None,
        }
    }

    /// Restrict the engine to a subset of the pattern table.
    pub fn with_kinds(mut self, kinds: &[crate::gartley::GartleyPatternKind]) -> Self {
        self.patterns.retain(|p| kinds.contains(&p.kind));
        self
    }

    /// Consume the bar at `index` and return the new fully formed
    /// patterns, if any.
    pub fn find_patterns(&mut self, source: &dyn BarSource, index: i64) -> Vec<GartleyItem> {
        self.pivots.calculate(source, index);
        self.update_border(source, index);
        self.prune_caches();
        self.update_wasted(source, index);

        let border = match self.border {
            Some(border) => border,
            None => return Vec::new(),
        };

        let bull_xs: Vec<DateTime<Utc>> =
            self.pivots.low_extrema().range(border..).copied().collect();
        for x_time in bull_xs {
            self.process_projections(source, x_time, true);
        }

        let bear_xs: Vec<DateTime<Utc>> =
            self.pivots.high_extrema().range(border..).copied().collect();
        for x_time in bear_xs {
            self.process_projections(source, x_time, false);
        }

        let mut found: Vec<GartleyItem> = Vec::new();
        for projections in self.active.values_mut() {
            for projection in projections.iter_mut() {
                if projection.update(source, index) != ProjectionState::PatternFormed {
                    continue;
                }
                let item = match validate_pattern(projection, source, &self.pivots, self.accuracy)
                {
                    Some(item) => item,
                    None => continue,
                };
                if found.iter().any(|known| known.same_as(&item)) {
                    continue;
                }
                debug!(pattern = %item.kind, accuracy = item.accuracy_percent, "pattern formed");
                found.push(item);
            }
        }

        found
    }

    fn update_border(&mut self, source: &dyn BarSource, index: i64) {
        let prev_index = (index - self.bars_depth).max(0);
        if prev_index < source.count() {
            self.border = Some(source.open_time(prev_index));
        }
    }

    fn prune_caches(&mut self) {
        let border = match self.border {
            Some(border) => border,
            None => return,
        };
        self.active.retain(|t, _| *t >= border);
        self.bull_x_to_a.retain(|t, _| *t >= border);
        self.bear_x_to_a.retain(|t, _| *t >= border);
        self.bull_wasted_x.retain(|t| *t >= border);
        self.bear_wasted_x.retain(|t| *t >= border);
        self.bull_a_max.retain(|t, _| *t >= border);
        self.bear_a_min.retain(|t, _| *t >= border);
    }

    /// An X point is wasted once price trades back through it; no new
    /// projections are ever seeded from a wasted X.
    fn update_wasted(&mut self, source: &dyn BarSource, index: i64) {
        let min = source.low(index);
        let max = source.high(index);

        for x_time in self.bull_x_to_a.keys() {
            if self.bull_wasted_x.contains(x_time) {
                continue;
            }
            if let Some(value) = self.pivots.low_value(*x_time) {
                if value > min {
                    self.bull_wasted_x.insert(*x_time);
                }
            }
        }

        for x_time in self.bear_x_to_a.keys() {
            if self.bear_wasted_x.contains(x_time) {
                continue;
            }
            if let Some(value) = self.pivots.high_value(*x_time) {
                if value < max {
                    self.bear_wasted_x.insert(*x_time);
                }
            }
        }
    }

    /// Pairs the X pivot at `x_time` with every new counter-pivot A and
    /// seeds one projection per pattern for each improving pair.
    fn process_projections(&mut self, source: &dyn BarSource, x_time: DateTime<Utc>, is_up: bool) {
        let wasted = if is_up {
            &self.bull_wasted_x
        } else {
            &self.bear_wasted_x
        };
        if wasted.contains(&x_time) {
            return;
        }

        let val_x = match if is_up {
            self.pivots.low_value(x_time)
        } else {
            self.pivots.high_value(x_time)
        } {
            Some(value) => value,
            None => return,
        };

        let mut a_extremum = *if is_up {
            self.bull_a_max.entry(x_time).or_insert(val_x)
        } else {
            self.bear_a_min.entry(x_time).or_insert(val_x)
        };
        let mut processed_a = *if is_up {
            self.bull_x_to_a.entry(x_time).or_insert(x_time)
        } else {
            self.bear_x_to_a.entry(x_time).or_insert(x_time)
        };

        let counter: Vec<(DateTime<Utc>, f64)> = if is_up {
            self.pivots.high_values()
        } else {
            self.pivots.low_values()
        }
        .range((Bound::Excluded(processed_a), Bound::Unbounded))
        .map(|(t, v)| (*t, *v))
        .collect();

        let mut wasted_now = false;
        for (a_time, a_value) in counter {
            if a_time > processed_a {
                processed_a = a_time;
            }
            if a_value.is_nan() {
                continue;
            }

            if is_up && val_x >= a_value || !is_up && val_x <= a_value {
                wasted_now = true;
                break;
            }

            // Same-side pivot values inside the X-A leg can also reach
            // through X; such a leg is not clean.
            let same_side = if is_up {
                self.pivots.low_values()
            } else {
                self.pivots.high_values()
            };
            let pierced = same_side
                .range((Bound::Excluded(x_time), Bound::Excluded(a_time)))
                .any(|(_, v)| if is_up { *v < val_x } else { *v > val_x });
            if pierced {
                break;
            }

            if is_up && a_extremum > a_value || !is_up && a_extremum < a_value {
                continue;
            }
            a_extremum = a_value;

            let x_index = match source.index_by_time(x_time) {
                Some(i) => i,
                None => continue,
            };
            let a_index = match source.index_by_time(a_time) {
                Some(i) => i,
                None => continue,
            };
            let timeframe = source.timeframe();
            let x_point = BarPoint::new(val_x, x_time, x_index, timeframe);
            let a_point = BarPoint::new(a_value, a_time, a_index, timeframe);

            let seeded = self.active.entry(x_time).or_default();
            for spec in &self.patterns {
                seeded.push(GartleyProjection::new(
                    spec.clone(),
                    x_point.clone(),
                    a_point.clone(),
                    self.wick_allowance,
                ));
            }
        }

        if is_up {
            self.bull_x_to_a.insert(x_time, processed_a);
            self.bull_a_max.insert(x_time, a_extremum);
            if wasted_now {
                self.bull_wasted_x.insert(x_time);
            }
        } else {
            self.bear_x_to_a.insert(x_time, processed_a);
            self.bear_a_min.insert(x_time, a_extremum);
            if wasted_now {
                self.bear_wasted_x.insert(x_time);
            }
        }
    }
}

/// No bar strictly between the two points may trade outside their price
/// range; the leg must be clean.
fn has_extrema_between(source: &dyn BarSource, p1: &BarPoint, p2: &BarPoint) -> bool {
    let max = p1.value.max(p2.value);
    let min = p1.value.min(p2.value);

    for i in (p1.bar_index + 1)..p2.bar_index {
        if source.high(i) > max || source.low(i) < min {
            return true;
        }
    }
    false
}

fn ratio_fit(ideal: f64, actual: f64) -> f64 {
    let min = ideal.min(actual);
    let max = ideal.max(actual);
    min / max
}

/// Turns a formed projection into a pattern item, or rejects it.
fn validate_pattern(
    projection: &GartleyProjection,
    source: &dyn BarSource,
    pivots: &PivotDetector,
    min_accuracy: f64,
) -> Option<GartleyItem> {
    let x = projection.item_x();
    let a = projection.item_a();
    let b = projection.item_b()?;
    let c = projection.item_c()?;
    let d = projection.item_d()?;

    let xa = (a.value - x.value).abs();
    let ab = (b.value - a.value).abs();
    let cb = (c.value - b.value).abs();
    let cd = (c.value - d.value).abs();
    let xc = (c.value - x.value).abs();
    let ad = (a.value - d.value).abs();
    if xa <= 0.0 || ab <= 0.0 || cb <= 0.0 || cd <= 0.0 || ad <= 0.0 {
        return None;
    }

    if has_extrema_between(source, x, a)
        || has_extrema_between(source, a, b)
        || has_extrema_between(source, b, c)
        || has_extrema_between(source, c, d)
    {
        return None;
    }

    // B and C must be confirmed pivots on the correct side.
    let is_bull = projection.is_bull();
    let b_is_pivot = if is_bull {
        pivots.low_extrema().contains(&b.open_time)
    } else {
        pivots.high_extrema().contains(&b.open_time)
    };
    let c_is_pivot = if is_bull {
        pivots.high_extrema().contains(&c.open_time)
    } else {
        pivots.low_extrema().contains(&c.open_time)
    };
    if !b_is_pivot || !c_is_pivot {
        return None;
    }

    // Each scored ratio must measure the same quantity its price window
    // validated: X-D windows count D from A as a fraction of X-A, B-D
    // windows count D from C as a fraction of C-B, and A-C counts from
    // B (or from X, for C-D setups).
    let xb = ab / xa;
    let xd = ad / xa;
    let bd = cd / cb;
    let ac = match projection.spec().setup_type {
        GartleySetupType::Ad => cb / ab,
        GartleySetupType::Cd => xc / xa,
    };

    let mut fits = vec![
        ratio_fit(projection.xto_d(), xd),
        ratio_fit(projection.ato_c(), ac),
        ratio_fit(projection.bto_d(), bd),
    ];
    if projection.xto_b() > 0.0 {
        fits.push(ratio_fit(projection.xto_b(), xb));
    }
    let accuracy = fits.iter().sum::<f64>() / fits.len() as f64;
    if accuracy > 0.0 && accuracy < min_accuracy {
        return None;
    }

    let (stop_loss, take_profit1, take_profit2) = projection.fit_for_trade(source)?;

    Some(GartleyItem {
        accuracy_percent: (accuracy * 100.0).round() as u32,
        kind: projection.spec().kind,
        item_x: x.clone(),
        item_a: a.clone(),
        item_b: b.clone(),
        item_c: c.clone(),
        item_d: d.clone(),
        stop_loss,
        take_profit1,
        take_profit2,
        xd_actual: xd,
        xd: projection.xto_d(),
        ac_actual: ac,
        ac: projection.ato_c(),
        bd_actual: bd,
        bd: projection.bto_d(),
        xb_actual: xb,
        xb: projection.xto_b(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{Candle, CandleSeries, TimeframeId};
    use crate::gartley::GartleyPatternKind;
    use chrono::TimeZone;

    fn minute(i: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap()
    }

    fn series_from_closes(closes: &[f64]) -> CandleSeries {
        let mut series = CandleSeries::new(TimeframeId::M1);
        for (i, &price) in closes.iter().enumerate() {
            series.push(Candle::new(price, price, price, price, minute(i as i64)));
        }
        series
    }

    fn bull_bat_closes() -> Vec<f64> {
        let mut closes = vec![103.0, 101.0, 100.0]; // X at bar 2
        closes.extend([102.0, 110.0, 120.0, 130.0, 140.0, 150.0, 158.0]);
        closes.push(161.8); // A at bar 10
        closes.extend([160.0, 150.0, 140.0, 131.0]);
        closes.push(130.9); // B at bar 15
        closes.extend([133.0, 140.0, 146.0]);
        closes.push(150.0); // C at bar 19
        closes.extend([148.0, 135.0, 120.0, 110.0]); // D at bar 23
        closes
    }

    fn run_engine(closes: &[f64], accuracy: f64) -> Vec<GartleyItem> {
        let series = series_from_closes(closes);
        let config = HarmonicConfig {
            accuracy,
            ..HarmonicConfig::default()
        };
        let mut engine = HarmonicProjectionEngine::new(&config);
        let mut all = Vec::new();
        for i in 0..series.count() {
            all.extend(engine.find_patterns(&series, i));
        }
        all
    }

    #[test]
    fn bull_bat_pattern_is_found() {
        let found = run_engine(&bull_bat_closes(), 0.85);
        assert_eq!(found.len(), 1);

        let item = &found[0];
        assert_eq!(item.kind, GartleyPatternKind::Bat);
        assert!(item.is_bull());
        assert!(item.accuracy_percent >= 90, "accuracy {}", item.accuracy_percent);
        assert_eq!(item.item_x.value, 100.0);
        assert_eq!(item.item_a.value, 161.8);
        assert_eq!(item.item_b.value, 130.9);
        assert_eq!(item.item_c.value, 150.0);
        assert_eq!(item.item_d.value, 110.0);
        assert!(item.stop_loss < item.item_d.value);
        assert!(item.take_profit1 > item.item_d.value);
        assert!(item.take_profit2 > item.take_profit1);
    }

    #[test]
    fn accuracy_filter_rejects_loose_fit() {
        let found = run_engine(&bull_bat_closes(), 0.99);
        assert!(found.is_empty());
    }

    #[test]
    fn exact_retracement_scores_a_tight_fit() {
        // D lands exactly on the bat's 0.886 X-A retracement; the X-D
        // component of the accuracy must score as a perfect fit.
        let mut closes = bull_bat_closes();
        let last = closes.len() - 1;
        closes[last] = 161.8 - 0.886 * 61.8;

        let found = run_engine(&closes, 0.95);
        assert_eq!(found.len(), 1);

        let item = &found[0];
        assert_eq!(item.kind, GartleyPatternKind::Bat);
        assert!((item.xd_actual - 0.886).abs() < 1e-9);
        assert!(
            item.accuracy_percent >= 95,
            "accuracy {}",
            item.accuracy_percent
        );
    }

    #[test]
    fn wasted_x_never_seeds_projections() {
        // Price trades back through the 100.0 X low right after A
        // confirms; that X is dead, even though the dip itself becomes
        // a fresh X for later patterns.
        let mut closes = bull_bat_closes();
        closes[11] = 99.0;
        let found = run_engine(&closes, 0.5);
        assert!(found.iter().all(|item| item.item_x.value != 100.0));
    }

    #[test]
    fn leg_cleanliness_check() {
        let series = series_from_closes(&[100.0, 105.0, 112.0, 108.0, 110.0]);
        let p1 = BarPoint::new(100.0, minute(0), 0, TimeframeId::M1);
        let p2 = BarPoint::new(110.0, minute(4), 4, TimeframeId::M1);
        // Bar 2 trades above the leg end.
        assert!(has_extrema_between(&series, &p1, &p2));

        let clean = series_from_closes(&[100.0, 103.0, 106.0, 108.0, 110.0]);
        assert!(!has_extrema_between(&clean, &p1, &p2));
    }
}
