//! Contracting-triangle thrust setups

use tracing::debug;
use uuid::Uuid;

use super::SetupState;
use crate::bars::BarSource;
use crate::config::TriangleConfig;
use crate::detect::ExtremumDetector;
use crate::events::SignalEvent;
use crate::point::{BarPoint, Leg};

/// Harmonic rungs a contracting leg may shrink by relative to the leg
/// before it.
const CONTRACTION_RATIOS: [f64; 4] = [0.5, 0.618, 0.786, 0.9];

/// Extrema needed for five legs plus the open tail.
const TRIANGLE_EXTREMA_COUNT: usize = 7;

/// Watches extremum streams for five-point contracting triangles and
/// trades the thrust out of them.
///
/// The five legs A..E must each shrink by one of the harmonic
/// contraction rungs within the configured allowance. The thrust fires
/// against leg A's direction once price breaks the wave-D extreme, the
/// target projects leg A's length from the entry, and the stop sits at
/// the wave-E extreme.
pub struct TriangleSetupMachine {
    config: TriangleConfig,
    detectors: Vec<ExtremumDetector>,
    state: SetupState,
    events: Vec<SignalEvent>,
}

impl TriangleSetupMachine {
    pub fn new(config: TriangleConfig) -> Self {
        let mut detectors = Vec::new();
        let mut scale = config.max_scale;
        while scale >= config.min_scale {
            detectors.push(ExtremumDetector::new(scale));
            match scale.checked_sub(config.scale_step.max(1)) {
                Some(next) => scale = next,
                None => break,
            }
        }

        Self {
            config,
            detectors,
            state: SetupState::default(),
            events: Vec::new(),
        }
    }

    pub fn is_in_setup(&self) -> bool {
        self.state.is_in_setup
    }

    pub fn drain_events(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn calculate(&mut self, source: &dyn BarSource, index: i64) {
        for detector in &mut self.detectors {
            detector.calculate(source, index);
            detector.prune(self.config.extrema_max);
        }

        for finder in 0..self.detectors.len() {
            if self.is_setup(source, index, finder) {
                break;
            }
        }
    }

    fn is_setup(&mut self, source: &dyn BarSource, index: i64, finder: usize) -> bool {
        let low = source.low(index);
        let high = source.high(index);
        let was_in_setup = self.state.is_in_setup;

        if !self.state.is_in_setup {
            self.check_triangle(source, index, finder, low, high);
        }

        if !self.state.is_in_setup || !was_in_setup {
            return false;
        }

        let is_up = self.state.end_price > self.state.start_price;
        let timeframe = source.timeframe();
        let trigger = BarPoint::new(
            self.state.trigger_level,
            source.open_time(self.state.trigger_bar_index),
            self.state.trigger_bar_index,
            timeframe,
        );

        // Take-profit resolves first on a same-bar double hit.
        let profit_hit =
            (is_up && high >= self.state.end_price) || (!is_up && low <= self.state.end_price);
        if profit_hit {
            self.state.is_in_setup = false;
            self.events.push(SignalEvent::TakeProfit {
                level: BarPoint::new(
                    self.state.end_price,
                    source.open_time(index),
                    index,
                    timeframe,
                ),
                trigger,
            });
            return false;
        }

        let stop_hit =
            (is_up && low <= self.state.start_price) || (!is_up && high >= self.state.start_price);
        if stop_hit {
            self.state.is_in_setup = false;
            self.events.push(SignalEvent::StopLoss {
                level: BarPoint::new(
                    self.state.start_price,
                    source.open_time(index),
                    index,
                    timeframe,
                ),
                trigger,
            });
            return false;
        }

        true
    }

    /// Tests the freshest six confirmed extrema for a contracting
    /// triangle and enters on a thrust through the wave-D extreme.
    fn check_triangle(
        &mut self,
        source: &dyn BarSource,
        index: i64,
        finder: usize,
        low: f64,
        high: f64,
    ) {
        let extrema = self.detectors[finder].to_list();
        if extrema.len() < TRIANGLE_EXTREMA_COUNT {
            return;
        }

        // The last entry is the open tail; the pattern needs confirmed
        // points only.
        let confirmed = &extrema[..extrema.len() - 1];
        let points = &confirmed[confirmed.len() - 6..];
        let p0 = &points[0];
        let p4 = &points[4];
        let p5 = &points[5];

        if Leg::new(p0, p5).bar_count() < self.config.min_bars {
            return;
        }
        if p5.bar_index == index {
            return;
        }

        let scale = self.detectors[finder].scale_rate();
        let mut legs = [0.0f64; 5];
        for (i, leg) in legs.iter_mut().enumerate() {
            *leg = Leg::new(&points[i], &points[i + 1]).length();
        }
        for window in legs.windows(2) {
            if window[0] < f64::EPSILON {
                return;
            }
            let ratio = window[1] / window[0];
            if ratio >= 1.0 || !matches_contraction(ratio, self.config.ratio_allowance) {
                debug!(scale, ratio, "leg ratio outside the contraction ladder");
                return;
            }
        }

        // Thrust runs against leg A.
        let is_up = p1_below_p0(points);
        let trigger_level = p4.value;

        // Price must stay inside the triangle until the breakout bar.
        for i in p5.bar_index + 1..index {
            if (is_up && source.high(i) >= trigger_level)
                || (!is_up && source.low(i) <= trigger_level)
            {
                return;
            }
        }

        let broke_out = (is_up && high >= trigger_level) || (!is_up && low <= trigger_level);
        if !broke_out {
            return;
        }

        // Cannot use the same triangle twice.
        if self.state.start_index == p0.bar_index || self.state.end_index == p5.bar_index {
            return;
        }

        let real_price = if trigger_level >= low && trigger_level <= high {
            trigger_level
        } else if (trigger_level - low).abs() < (trigger_level - high).abs() {
            low
        } else {
            high
        };

        let thrust = legs[0];
        let (start_price, end_price) = if is_up {
            (p5.value, real_price + thrust)
        } else {
            (p5.value, real_price - thrust)
        };

        if (is_up && (real_price >= end_price || real_price <= start_price))
            || (!is_up && (real_price <= end_price || real_price >= start_price))
        {
            debug!(scale, "stop or target already hit, signal skipped");
            return;
        }

        self.state.start_index = p0.bar_index;
        self.state.end_index = p5.bar_index;
        self.state.start_price = start_price;
        self.state.end_price = end_price;
        self.state.trigger_level = real_price;
        self.state.trigger_bar_index = index;
        self.state.is_in_setup = true;

        let timeframe = source.timeframe();
        debug!(scale, entry = real_price, "triangle thrust entered");
        self.events.push(SignalEvent::Enter {
            id: Uuid::new_v4(),
            level: BarPoint::new(real_price, source.open_time(index), index, timeframe),
            take_profit: BarPoint::new(end_price, source.open_time(index), index, timeframe),
            stop_loss: BarPoint::new(start_price, p5.open_time, p5.bar_index, timeframe),
            waves: points.to_vec(),
            view_anchor: None,
        });
    }
}

fn matches_contraction(ratio: f64, allowance: f64) -> bool {
    CONTRACTION_RATIOS
        .iter()
        .any(|rung| (ratio / rung - 1.0).abs() <= allowance)
}

/// Leg A points down when the second extremum sits under the first.
fn p1_below_p0(points: &[BarPoint]) -> bool {
    points[1].value < points[0].value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{Candle, CandleSeries, TimeframeId};
    use chrono::{TimeZone, Utc};

    fn doji(value: f64, index: i64) -> Candle {
        let t = Utc.timestamp_opt(1_700_000_000 + index * 60, 0).unwrap();
        Candle::new(value, value, value, value, t)
    }

    /// Five legs each 0.786 of the one before, then an upward thrust
    /// through the wave-D extreme at 106.54.
    fn triangle_values() -> Vec<f64> {
        vec![
            105.0, 110.0, // lead-in to the triangle origin
            106.0, 103.0, 100.0, // leg A: 110 -> 100
            103.0, 107.86, // leg B
            104.0, 101.68, // leg C
            104.5, 106.54, // leg D
            104.0, 102.72, // leg E
            104.0, 106.6, // breakout bar
        ]
    }

    fn series(values: &[f64]) -> CandleSeries {
        CandleSeries::from_candles(
            TimeframeId::M1,
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| doji(v, i as i64))
                .collect(),
        )
    }

    #[test]
    fn contracting_triangle_thrust_enters_and_takes_profit() {
        let mut values = triangle_values();
        values.push(117.0); // beyond the 116.6 target
        let series = series(&values);

        let mut machine = TriangleSetupMachine::new(TriangleConfig::default());
        let mut events = Vec::new();
        for index in 0..=13 {
            machine.calculate(&series, index);
            events.extend(machine.drain_events());
        }
        assert!(events.is_empty(), "no signal before the breakout");

        machine.calculate(&series, 14);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SignalEvent::Enter {
                level,
                take_profit,
                stop_loss,
                waves,
                ..
            } => {
                assert_eq!(level.value, 106.6);
                assert_eq!(level.bar_index, 14);
                assert!((take_profit.value - 116.6).abs() < 1e-9);
                assert_eq!(stop_loss.value, 102.72);
                assert_eq!(waves.len(), 6);
                assert_eq!(waves[0].value, 110.0);
                assert_eq!(waves[5].value, 102.72);
            }
            other => panic!("expected Enter, got {other:?}"),
        }
        assert!(machine.is_in_setup());

        machine.calculate(&series, 15);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SignalEvent::TakeProfit { .. }));
        assert!(!machine.is_in_setup());
    }

    #[test]
    fn expanding_legs_are_rejected() {
        // Leg B longer than leg A breaks the contraction rule.
        let values = vec![
            105.0, 110.0, 106.0, 103.0, 100.0, // A: 10
            104.0, 108.0, 112.0, // B: 12, expanding
            108.0, 104.0, 102.0, 105.0, 108.0, 106.0, 104.0, 110.0,
        ];
        let series = series(&values);

        let mut machine = TriangleSetupMachine::new(TriangleConfig::default());
        for index in 0..values.len() as i64 {
            machine.calculate(&series, index);
        }
        assert!(machine.drain_events().is_empty());
        assert!(!machine.is_in_setup());
    }

    #[test]
    fn short_triangles_are_rejected() {
        // Same shape compressed into one bar per leg.
        let values = vec![
            105.0, 110.0, 100.0, 107.86, 101.68, 106.54, 102.72, 104.0, 106.6,
        ];
        let series = series(&values);

        let config = TriangleConfig {
            min_bars: 10,
            ..TriangleConfig::default()
        };
        let mut machine = TriangleSetupMachine::new(config);
        for index in 0..values.len() as i64 {
            machine.calculate(&series, index);
        }
        assert!(machine.drain_events().is_empty());
    }

    #[test]
    fn stop_loss_fires_on_a_failed_thrust() {
        let mut values = triangle_values();
        values.push(102.0); // back under the wave-E extreme at 102.72
        let series = series(&values);

        let mut machine = TriangleSetupMachine::new(TriangleConfig::default());
        for index in 0..=14 {
            machine.calculate(&series, index);
        }
        machine.drain_events();
        assert!(machine.is_in_setup());

        machine.calculate(&series, 15);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SignalEvent::StopLoss { level, .. } => assert_eq!(level.value, 102.72),
            other => panic!("expected StopLoss, got {other:?}"),
        }
    }
}
