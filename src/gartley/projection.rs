//! Single-XA pattern projection
//!
//! Holds the finding state for one X-A pair and one pattern spec. Not
//! thread-safe by design; the owning engine drives it candle by candle.

use chrono::{DateTime, Utc};

use crate::bars::BarSource;
use crate::gartley::{
    GartleySetupType, PatternSpec, ProjectionState, RealLevel, RealLevelCombo,
};
use crate::point::BarPoint;

const SL_RATIO: f64 = 0.272;
const TP1_RATIO: f64 = 0.382;
const TP2_RATIO: f64 = 0.618;
const MAX_SL_TP_RATIO_ALLOWED: f64 = 2.0;

/// Incremental XABCD projection for one X-A leg.
#[derive(Debug, Clone)]
pub struct GartleyProjection {
    spec: PatternSpec,
    item_x: BarPoint,
    item_a: BarPoint,
    item_b: Option<BarPoint>,
    item_b_second: Option<BarPoint>,
    item_c: Option<BarPoint>,
    item_d: Option<BarPoint>,
    is_bull: bool,
    is_cd: bool,
    is_up_k: f64,
    length_xa: f64,
    wick_allowance: f64,
    min: f64,
    min_date: DateTime<Utc>,
    max: f64,
    max_date: DateTime<Utc>,
    d_cancel_price: Option<f64>,
    pattern_ready: bool,
    projection_ready: bool,
    invalid: bool,
    ac_levels: Vec<RealLevel>,
    xb_levels: Vec<RealLevel>,
    xd_levels: Vec<RealLevel>,
    bd_levels: Vec<RealLevel>,
    xd_bd_combos: Vec<RealLevelCombo>,
    xto_d: f64,
    ato_c: f64,
    bto_d: f64,
    xto_b: f64,
}

impl GartleyProjection {
    pub fn new(
        spec: PatternSpec,
        item_x: BarPoint,
        item_a: BarPoint,
        wick_allowance: f64,
    ) -> Self {
        let is_bull = item_x.value < item_a.value;
        let is_cd = spec.setup_type == GartleySetupType::Cd;
        let length_xa = (item_a.value - item_x.value).abs();
        let is_up_k = if is_bull { 1.0 } else { -1.0 };

        let mut projection = Self {
            item_b: None,
            item_b_second: None,
            item_c: None,
            item_d: None,
            is_bull,
            is_cd,
            is_up_k,
            length_xa,
            wick_allowance,
            min: f64::INFINITY,
            min_date: item_a.open_time,
            max: f64::NEG_INFINITY,
            max_date: item_a.open_time,
            d_cancel_price: None,
            pattern_ready: false,
            projection_ready: false,
            invalid: false,
            ac_levels: Vec::new(),
            xb_levels: Vec::new(),
            xd_levels: Vec::new(),
            bd_levels: Vec::new(),
            xd_bd_combos: Vec::new(),
            xto_d: 0.0,
            ato_c: 0.0,
            bto_d: 0.0,
            xto_b: 0.0,
            spec,
            item_x,
            item_a,
        };

        projection.refresh_ac_levels();
        projection.xb_levels = if projection.spec.xb.is_empty() {
            // Unconstrained B: anywhere inside the X-A leg qualifies.
            vec![RealLevel::new(
                0.0,
                projection.item_a.value,
                projection.item_x.value,
            )]
        } else {
            projection.price_ranges(
                &projection.spec.xb.clone(),
                true,
                projection.length_xa,
                projection.item_a.value,
            )
        };
        projection.xd_levels = projection.price_ranges(
            &projection.spec.xd.clone(),
            true,
            projection.length_xa,
            projection.item_a.value,
        );
        // B-D ranges wait until C is known.
        projection
    }

    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    pub fn is_bull(&self) -> bool {
        self.is_bull
    }

    pub fn item_x(&self) -> &BarPoint {
        &self.item_x
    }

    pub fn item_a(&self) -> &BarPoint {
        &self.item_a
    }

    pub fn item_b(&self) -> Option<&BarPoint> {
        self.item_b.as_ref()
    }

    pub fn item_c(&self) -> Option<&BarPoint> {
        self.item_c.as_ref()
    }

    pub fn item_d(&self) -> Option<&BarPoint> {
        self.item_d.as_ref()
    }

    pub fn xto_d(&self) -> f64 {
        self.xto_d
    }

    pub fn ato_c(&self) -> f64 {
        self.ato_c
    }

    pub fn bto_d(&self) -> f64 {
        self.bto_d
    }

    pub fn xto_b(&self) -> f64 {
        self.xto_b
    }

    /// Price windows where D may still land, once X-A-B-C is in place.
    pub fn projection_d_windows(&self) -> Option<&[RealLevelCombo]> {
        if !self.projection_ready {
            return None;
        }
        Some(&self.xd_bd_combos)
    }

    /// Maps ratio values onto actual price bands with the wick allowance
    /// applied on both sides. `use_counter_point` flips the direction for
    /// legs that retrace against the X-A move.
    fn price_ranges(
        &self,
        ratios: &[f64],
        use_counter_point: bool,
        base_length: f64,
        count_point: f64,
    ) -> Vec<RealLevel> {
        let k = if use_counter_point {
            -self.is_up_k
        } else {
            self.is_up_k
        };

        ratios
            .iter()
            .map(|&ratio| {
                let ratio_start = ratio * (1.0 - self.wick_allowance);
                let ratio_end = ratio * (1.0 + self.wick_allowance);
                RealLevel::new(
                    ratio,
                    count_point + k * base_length * ratio_start,
                    count_point + k * base_length * ratio_end,
                )
            })
            .collect()
    }

    /// A-C bands count from X for C-D setups and from B otherwise.
    fn refresh_ac_levels(&mut self) {
        if self.is_cd {
            self.ac_levels = self.price_ranges(
                &self.spec.ac.clone(),
                false,
                self.length_xa,
                self.item_x.value,
            );
        } else if let Some(b) = self.item_b.clone() {
            let length_ab = (self.item_a.value - b.value).abs();
            self.ac_levels =
                self.price_ranges(&self.spec.ac.clone(), false, length_ab, b.value);
        }
    }

    fn set_item_b(&mut self, value: Option<BarPoint>) {
        let cleared = value.is_none();
        self.item_b = value;
        if cleared {
            self.set_item_c(None);
            self.item_d = None;
        } else if !self.is_cd {
            self.refresh_ac_levels();
        }
    }

    fn set_item_c(&mut self, value: Option<BarPoint>) {
        match value {
            None => {
                self.item_c = None;
                self.bd_levels.clear();
                self.xd_bd_combos.clear();
                self.pattern_ready = false;
                self.projection_ready = false;
                self.d_cancel_price = None;
                self.ato_c = 0.0;
            }
            Some(c) => {
                if let Some(b) = self.item_b.clone() {
                    self.bd_levels = self.price_ranges(
                        &self.spec.bd.clone(),
                        true,
                        (b.value - c.value).abs(),
                        c.value,
                    );
                }
                self.item_c = Some(c);
                self.rebuild_d_windows();
                self.projection_ready = true;
            }
        }
    }

    fn rebuild_d_windows(&mut self) {
        self.xd_bd_combos.clear();
        for bd in self.bd_levels.iter().rev() {
            for xd in self.xd_levels.iter().rev() {
                let combo = RealLevelCombo::new(*xd, *bd);
                if combo.is_empty() {
                    continue;
                }
                self.xd_bd_combos.push(combo);
            }
        }

        if self.xd_bd_combos.is_empty() {
            return;
        }

        // Price squeezing through the furthest window cancels the whole
        // projection.
        self.d_cancel_price = if self.is_bull {
            self.xd_bd_combos
                .iter()
                .map(|c| c.min)
                .min_by(|a, b| a.total_cmp(b))
        } else {
            self.xd_bd_combos
                .iter()
                .map(|c| c.max)
                .max_by(|a, b| a.total_cmp(b))
        };
    }

    /// Stop, first and second take levels for the formed D point, or
    /// `None` when the setup is not worth taking.
    pub fn fit_for_trade(&self, source: &dyn BarSource) -> Option<(f64, f64, f64)> {
        let c = self.item_c.as_ref()?;
        let d = self.item_d.as_ref()?;

        let cd = (c.value - d.value).abs();
        let ad = (self.item_a.value - d.value).abs();
        let close_d = source.close(d.bar_index);

        let actual_size = match self.spec.setup_type {
            GartleySetupType::Ad => ad,
            GartleySetupType::Cd => cd,
        };

        let sl_len = actual_size * SL_RATIO;
        let tp1_len = actual_size * TP1_RATIO;
        let (sl, tp1) = if self.is_bull {
            (d.value - sl_len, d.value + tp1_len)
        } else {
            (d.value + sl_len, d.value - tp1_len)
        };

        // The take level must not already be hit on the D candle.
        if self.is_bull && close_d >= tp1 || !self.is_bull && close_d <= tp1 {
            return None;
        }

        let tp2_len = actual_size * TP2_RATIO;
        let tp2 = if self.is_bull {
            d.value + tp2_len
        } else {
            d.value - tp2_len
        };

        let risk_ratio = (close_d - sl).abs() / (close_d - tp1).abs();
        if risk_ratio > MAX_SL_TP_RATIO_ALLOWED {
            return None;
        }

        Some((sl, tp1, tp2))
    }

    fn update_b(&mut self, dt: DateTime<Utc>) {
        if self.item_c.is_some() && self.item_b.is_some() {
            if let Some(c) = &self.item_c {
                if c.open_time <= dt {
                    return;
                }
            }
        }
        let second = match self.item_b_second.clone() {
            Some(second) => second,
            None => return,
        };

        for level in self.xb_levels.clone() {
            let value = second.value;
            if self.is_bull {
                if value > level.start || value < level.end {
                    continue;
                }
                if self.item_b.as_ref().is_some_and(|b| b.value < value) {
                    continue;
                }
            } else {
                if value < level.start || value > level.end {
                    continue;
                }
                if self.item_b.as_ref().is_some_and(|b| b.value > value) {
                    continue;
                }
            }

            self.set_item_b(Some(second.clone()));
            self.xto_b = level.ratio;
            break;
        }
    }

    fn update_c(&mut self, point: BarPoint) {
        let b = match self.item_b.clone() {
            Some(b) => b,
            None => return,
        };

        if let Some(c) = &self.item_c {
            if self.is_bull && point.value > c.value || !self.is_bull && point.value < c.value {
                // The price went beyond the existing C, drop it.
                self.set_item_c(None);
            }
        }

        for level in self.ac_levels.clone() {
            let value = point.value;
            if self.is_bull {
                if value < level.start || value > level.end {
                    continue;
                }
                if self.item_c.as_ref().is_some_and(|c| c.value > value) {
                    continue;
                }
            } else {
                if value > level.start || value < level.end {
                    continue;
                }
                if self.item_c.as_ref().is_some_and(|c| c.value < value) {
                    continue;
                }
            }

            if point.open_time <= b.open_time {
                break;
            }

            // A deeper counter-move after B means B itself is stale.
            if self.is_bull && self.min < b.value && self.min_date > b.open_time
                || !self.is_bull && self.max > b.value && self.max_date > b.open_time
            {
                self.set_item_b(None);
                break;
            }

            self.set_item_c(Some(point));
            self.ato_c = level.ratio;
            break;
        }
    }

    fn update_d(&mut self, source: &dyn BarSource, point: BarPoint) {
        let mut levels_to_delete: Vec<RealLevel> = Vec::new();

        let mut combos = self.xd_bd_combos.clone();
        combos.sort_by(|a, b| a.bd.ratio.total_cmp(&b.bd.ratio));

        for combo in combos {
            let value = point.value;
            if self.is_bull {
                if value > combo.max {
                    continue;
                }
                if value < combo.min {
                    if value < combo.bd.min() {
                        levels_to_delete.push(combo.bd);
                    }
                    if value < combo.xd.min() {
                        levels_to_delete.push(combo.xd);
                    }
                    continue;
                }
            } else {
                if value < combo.min {
                    continue;
                }
                if value > combo.max {
                    if value > combo.bd.max() {
                        levels_to_delete.push(combo.bd);
                    }
                    if value > combo.xd.max() {
                        levels_to_delete.push(combo.xd);
                    }
                    continue;
                }
            }

            levels_to_delete.push(combo.bd);
            levels_to_delete.push(combo.xd);

            if self.item_d.as_ref().is_some_and(|d| {
                self.is_bull && d.value < value || !self.is_bull && d.value > value
            }) {
                continue;
            }

            self.item_d = Some(point.clone());
            if self.fit_for_trade(source).is_none() {
                continue;
            }

            self.xto_d = combo.xd.ratio;
            self.bto_d = combo.bd.ratio;
            self.pattern_ready = true;
            // Stop advertising the projection once the pattern is whole.
            self.projection_ready = false;
            break;
        }

        if !self.pattern_ready {
            return;
        }
        for dead in levels_to_delete {
            self.xd_bd_combos
                .retain(|c| c.bd != dead && c.xd != dead);
        }
    }

    fn check_point(&mut self, source: &dyn BarSource, point: BarPoint, is_high: bool) {
        let is_straight = self.is_bull == is_high;

        if !is_straight {
            let improves = match &self.item_b_second {
                None => true,
                Some(second) => {
                    self.is_bull && second.value > point.value
                        || !self.is_bull && second.value < point.value
                }
            };
            if improves && self.item_a.open_time != point.open_time {
                self.item_b_second = Some(point.clone());
            }

            if self.item_c.is_none() {
                self.update_b(point.open_time);
            }
        }

        if is_straight {
            self.update_c(point);
        } else {
            self.update_d(source, point);
        }
    }

    /// Feed the candle at `index` and report the projection state.
    pub fn update(&mut self, source: &dyn BarSource, index: i64) -> ProjectionState {
        if self.pattern_ready {
            return ProjectionState::PatternSame;
        }
        if self.invalid {
            return ProjectionState::NoProjection;
        }

        let current_dt = source.open_time(index);
        let prev_pattern_ready = self.pattern_ready;
        let prev_projection_ready = self.projection_ready;
        self.projection_ready = false;
        self.pattern_ready = false;

        let high = source.high(index);
        let low = source.low(index);

        if low < self.min {
            self.min = low;
            self.min_date = current_dt;
        }
        if high > self.max {
            self.max = high;
            self.max_date = current_dt;
        }

        if let Some(cancel) = self.d_cancel_price {
            if self.is_bull && low < cancel || !self.is_bull && high > cancel {
                self.invalid = true;
                return ProjectionState::NoProjection;
            }
        }

        if self.item_b.is_none() {
            let broke_leg = if self.is_bull {
                low < self.item_x.value || high > self.item_a.value
            } else {
                high > self.item_x.value || low < self.item_a.value
            };
            if broke_leg {
                self.invalid = true;
                return ProjectionState::NoProjection;
            }
        }

        if self.item_c.is_none() {
            let crossed_x = if self.is_bull {
                low < self.item_x.value
            } else {
                high > self.item_x.value
            };
            if crossed_x {
                self.invalid = true;
                return ProjectionState::NoProjection;
            }
        }

        let timeframe = source.timeframe();
        self.check_point(
            source,
            BarPoint::new(high, current_dt, index, timeframe),
            true,
        );
        self.check_point(
            source,
            BarPoint::new(low, current_dt, index, timeframe),
            false,
        );

        if self.pattern_ready {
            return ProjectionState::PatternFormed;
        }
        self.pattern_ready = prev_pattern_ready;

        if self.projection_ready {
            return ProjectionState::ProjectionFormed;
        }
        self.projection_ready = prev_projection_ready;

        if prev_pattern_ready {
            return ProjectionState::PatternSame;
        }
        if prev_projection_ready {
            return ProjectionState::ProjectionSame;
        }
        ProjectionState::NoProjection
    }
}
