//! Impulse trade-setup state machine

use tracing::debug;
use uuid::Uuid;

use crate::bars::BarSource;
use crate::config::{ImpulseConfig, SetupConfig};
use crate::detect::ExtremumDetector;
use crate::elliott::{smooth, ImpulseClassifier};
use crate::events::SignalEvent;
use crate::point::{BarPoint, Leg};

/// Fewest extrema a detector must hold before a candidate leg exists.
const MINIMUM_EXTREMA_COUNT: usize = 2;

/// Mutable per-stream setup snapshot. At most one setup is active at a
/// time; entry and exit transitions are guarded by `is_in_setup`.
#[derive(Debug, Clone)]
pub struct SetupState {
    pub is_in_setup: bool,
    pub start_index: i64,
    pub end_index: i64,
    pub start_price: f64,
    pub end_price: f64,
    pub trigger_level: f64,
    pub trigger_bar_index: i64,
}

impl Default for SetupState {
    fn default() -> Self {
        Self {
            is_in_setup: false,
            start_index: -1,
            end_index: -1,
            start_price: 0.0,
            end_price: 0.0,
            trigger_level: 0.0,
            trigger_bar_index: -1,
        }
    }
}

/// Searches extremum streams for initial impulsive legs and trades
/// their retracement.
///
/// A bank of extremum detectors runs from the coarsest configured scale
/// down to the finest; each bar, the machine takes the freshest
/// extrema pair of each detector as a candidate leg (walking older
/// pairs back to `bars_depth` when the freshest yields nothing) and
/// enters once price retraces the leg to the trigger ratio and the leg
/// classifies as an impulse. The first (coarsest) detector that
/// produces a setup wins the bar.
///
/// Signals are queued; hosts drain them after `calculate`/`on_tick`.
pub struct SetupStateMachine {
    config: SetupConfig,
    classifier: ImpulseClassifier,
    detectors: Vec<ExtremumDetector>,
    /// Detector armed for the per-tick fast path after a pre-trigger touch.
    pre_trigger: Option<usize>,
    last_bar_index: i64,
    state: SetupState,
    events: Vec<SignalEvent>,
}

impl SetupStateMachine {
    pub fn new(config: SetupConfig, impulse: ImpulseConfig) -> Self {
        // The machine-level harmony band overrides the classifier's own.
        let impulse = ImpulseConfig {
            correction_allowance_percent: config.correction_allowance_percent,
            ..impulse
        };
        Self::with_classifier(config, ImpulseClassifier::new(impulse))
    }

    /// Build with a caller-supplied classifier (e.g. one carrying an
    /// external oracle).
    pub fn with_classifier(config: SetupConfig, classifier: ImpulseClassifier) -> Self {
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
            classifier,
            detectors,
            pre_trigger: None,
            last_bar_index: -1,
            state: SetupState::default(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &SetupState {
        &self.state
    }

    pub fn is_in_setup(&self) -> bool {
        self.state.is_in_setup
    }

    /// Take all signals queued since the previous drain.
    pub fn drain_events(&mut self) -> Vec<SignalEvent> {
        std::mem::take(&mut self.events)
    }

    /// Consume the closed bar at `index`: advance every detector, then
    /// run the setup search coarse-to-fine, stopping at the first scale
    /// that yields (or still holds) a setup.
    pub fn calculate(&mut self, source: &dyn BarSource, index: i64) {
        self.last_bar_index = index;
        for detector in &mut self.detectors {
            detector.calculate(source, index);
            detector.prune(self.config.extrema_max);
        }

        for finder in 0..self.detectors.len() {
            if self.is_setup(source, index, finder, None) {
                break;
            }
        }
    }

    /// Low-latency entry path: re-check the armed pre-trigger scale
    /// against an intra-bar price. A no-op unless a pre-trigger is armed.
    pub fn on_tick(&mut self, source: &dyn BarSource, bid: f64) {
        let Some(finder) = self.pre_trigger else {
            return;
        };
        self.is_setup(source, self.last_bar_index, finder, Some(bid));
    }

    /// One detector's full pass: search for an entry while flat, or
    /// check the active setup's exits. Returns whether the stream is in
    /// a setup that existed before this call.
    fn is_setup(
        &mut self,
        source: &dyn BarSource,
        index: i64,
        finder: usize,
        tick: Option<f64>,
    ) -> bool {
        let extrema = self.detectors[finder].to_list();
        if extrema.len() < MINIMUM_EXTREMA_COUNT {
            return false;
        }

        let low = tick.unwrap_or_else(|| source.low(index));
        let high = tick.unwrap_or_else(|| source.high(index));
        let was_in_setup = self.state.is_in_setup;

        if !self.state.is_in_setup {
            // We don't know how far back the nearest initial impulse is,
            // so walk older extrema pairs until one qualifies or the
            // depth horizon is reached.
            let mut start_pos = extrema.len() - 2;
            loop {
                self.check_impulse(source, index, finder, &extrema, start_pos, low, high, tick);
                if self.state.is_in_setup {
                    break;
                }
                if index - extrema[start_pos].bar_index > self.config.bars_depth {
                    break;
                }
                if start_pos == 0 {
                    break;
                }
                start_pos -= 1;

                let start = &extrema[start_pos];
                let end = &extrema[start_pos + 1];
                // No longer between the start and end of the leg.
                if (start.value >= low && end.value >= low)
                    || (start.value <= high && end.value <= high)
                {
                    break;
                }
            }
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

    /// Evaluate one candidate leg `(extrema[start_pos], extrema[start_pos + 1])`.
    /// Enters the setup and queues the signal when every gate passes.
    #[allow(clippy::too_many_arguments)]
    fn check_impulse(
        &mut self,
        source: &dyn BarSource,
        index: i64,
        finder: usize,
        extrema: &[BarPoint],
        start_pos: usize,
        low: f64,
        high: f64,
        tick: Option<f64>,
    ) {
        let start = &extrema[start_pos];
        let end = &extrema[start_pos + 1];
        let leg = Leg::new(start, end);

        if leg.bar_count() < self.config.min_bars_in_impulse {
            return;
        }

        let start_value = start.value;
        let end_value = end.value;
        let is_up = leg.is_up();

        // The market may have already resolved this leg.
        let max_value = start_value.max(end_value);
        let min_value = start_value.min(end_value);
        for i in end.bar_index + 1..index {
            if max_value <= source.high(i) || min_value >= source.low(i) {
                return;
            }
        }

        let Some(anchor) = initial_movement_edge(extrema, start_pos, start_value, end_value) else {
            return;
        };

        let scale = self.detectors[finder].scale_rate();
        let leg_length = leg.length();
        let trigger_for = |ratio: f64| {
            if is_up {
                end_value - leg_length * ratio
            } else {
                end_value + leg_length * ratio
            }
        };
        let got_setup = |ratio: f64| {
            let level = trigger_for(ratio);
            if is_up {
                low <= level && low > start_value
            } else {
                high >= level && high < start_value
            }
        };

        if !got_setup(self.config.trigger_ratio) {
            // Shallow touch: arm this scale for the per-tick fast path.
            if self.pre_trigger.is_none() && got_setup(self.config.pre_trigger_ratio) {
                self.pre_trigger = Some(finder);
            }
            return;
        }
        let trigger_level = trigger_for(self.config.trigger_ratio);
        self.pre_trigger = None;

        let waves = match self.classifier.classify(source, start, end, scale) {
            Some(result) => result.waves(),
            None if self.classifier.is_impulse(source, start, end, scale) => {
                vec![start.clone(), end.clone()]
            }
            None => {
                debug!(scale, "candidate leg is not an impulse");
                return;
            }
        };

        if self.config.require_smooth && !smooth::is_smooth_impulse(source, start, end) {
            debug!(scale, "candidate leg is not smooth");
            return;
        }

        // Cannot use the same impulse twice.
        if self.state.start_index == start.bar_index || self.state.end_index == end.bar_index {
            return;
        }

        // Wait for the next bar when the leg ends on the current one.
        if end.bar_index == index {
            return;
        }

        // A zigzag right before the leg suggests a flat or a running
        // triangle rather than a fresh impulse.
        if start_pos > 0 {
            let before = &extrema[start_pos - 1];
            if self.classifier.is_zigzag(source, before, start, scale) {
                debug!(scale, "zigzag before the candidate leg");
                return;
            }
        }

        // Snap the trigger to a price the bar actually traded.
        let real_price = if trigger_level >= low && trigger_level <= high {
            tick.unwrap_or(trigger_level)
        } else if (trigger_level - low).abs() < (trigger_level - high).abs() {
            tick.unwrap_or(low)
        } else {
            tick.unwrap_or(high)
        };

        let end_allowance = (real_price - end_value).abs() * self.config.tp_allowance_percent / 100.0;
        let start_allowance =
            (real_price - start_value).abs() * self.config.sl_allowance_percent / 100.0;

        let target = leg_length * self.config.take_ratio;
        let (start_price, end_price) = if is_up {
            (
                start_value - start_allowance,
                start_value + target - end_allowance,
            )
        } else {
            (
                start_value + start_allowance,
                start_value - target + end_allowance,
            )
        };

        // Entry already beyond either level means the signal is unusable.
        if (is_up && (real_price >= end_price || real_price <= start_price))
            || (!is_up && (real_price <= end_price || real_price >= start_price))
        {
            debug!(scale, "stop or target already hit, signal skipped");
            return;
        }

        self.state.start_index = start.bar_index;
        self.state.end_index = end.bar_index;
        self.state.start_price = start_price;
        self.state.end_price = end_price;
        self.state.trigger_level = real_price;
        self.state.trigger_bar_index = index;
        self.state.is_in_setup = true;

        let timeframe = source.timeframe();
        debug!(scale, entry = real_price, "setup entered");
        self.events.push(SignalEvent::Enter {
            id: Uuid::new_v4(),
            level: BarPoint::new(real_price, source.open_time(index), index, timeframe),
            take_profit: BarPoint::new(end_price, end.open_time, end.bar_index, timeframe),
            stop_loss: BarPoint::new(start_price, start.open_time, start.bar_index, timeframe),
            waves,
            view_anchor: Some(anchor),
        });
    }
}

/// Rewinds earlier extrema to prove the leg is the most recent
/// impulsive move: some prior point must sit beyond `end_value` before
/// any point at or inside `start_value`. Returns that edge extremum.
fn initial_movement_edge(
    extrema: &[BarPoint],
    start_pos: usize,
    start_value: f64,
    end_value: f64,
) -> Option<BarPoint> {
    let is_up = end_value > start_value;

    for cur in (0..start_pos).rev() {
        let edge = &extrema[cur];
        if is_up {
            if edge.value <= start_value {
                return None;
            }
            if edge.value > end_value {
                return Some(edge.clone());
            }
        } else {
            if edge.value >= start_value {
                return None;
            }
            if edge.value < end_value {
                return Some(edge.clone());
            }
        }
    }

    None
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

    /// A prior high at 111.5, a drop to 100, a 5-wave rally to 110 with
    /// sub-waves visible at scale 38 and below, then a retracement into
    /// the 0.5 trigger at 105.
    fn rally_values() -> Vec<f64> {
        vec![
            108.0, 111.5, // prior swing high (proves the leg initial)
            108.0, 104.0, 100.0, // drop to the leg start
            101.0, 102.0, 103.0, // wave 1
            102.6, // wave 2
            103.5, 104.5, 105.5, 106.5, 107.5, 108.6, // wave 3
            108.185, // wave 4
            109.0, 109.5, 110.0, // wave 5
            109.0, 107.5, 106.0, 105.2, 104.9, // retracement to the trigger
        ]
    }

    fn machine() -> SetupStateMachine {
        SetupStateMachine::new(SetupConfig::default(), ImpulseConfig::default())
    }

    fn feed(machine: &mut SetupStateMachine, series: &CandleSeries, upto: i64) -> Vec<SignalEvent> {
        let mut events = Vec::new();
        for index in 0..=upto {
            machine.calculate(series, index);
            events.extend(machine.drain_events());
        }
        events
    }

    #[test]
    fn retracement_into_trigger_enters_once() {
        let series = CandleSeries::from_candles(
            TimeframeId::M1,
            rally_values()
                .iter()
                .enumerate()
                .map(|(i, &v)| doji(v, i as i64))
                .collect(),
        );

        let mut machine = machine();
        let early = feed(&mut machine, &series, 22);
        assert!(early.is_empty(), "no signal before the trigger is touched");

        machine.calculate(&series, 23);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        assert!(machine.is_in_setup());

        match &events[0] {
            SignalEvent::Enter {
                level,
                take_profit,
                stop_loss,
                waves,
                view_anchor,
                ..
            } => {
                assert_eq!(level.value, 104.9);
                assert_eq!(level.bar_index, 23);
                assert_eq!(take_profit.value, 110.0);
                assert!((stop_loss.value - 99.902).abs() < 1e-9);
                assert_eq!(waves.len(), 6);
                assert_eq!(waves[0].value, 100.0);
                assert_eq!(waves[5].value, 110.0);
                let anchor = view_anchor.as_ref().unwrap();
                assert_eq!(anchor.value, 111.5);
            }
            other => panic!("expected Enter, got {other:?}"),
        }
    }

    #[test]
    fn take_profit_wins_and_setup_is_not_reused() {
        let mut values = rally_values();
        values.push(121.0); // bar 24: target hit
        values.push(99.0); // bar 25: crosses the old stop, must stay silent
        let series = CandleSeries::from_candles(
            TimeframeId::M1,
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| doji(v, i as i64))
                .collect(),
        );

        let mut machine = machine();
        feed(&mut machine, &series, 23);

        machine.calculate(&series, 24);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SignalEvent::TakeProfit { .. }));
        assert!(!machine.is_in_setup());

        machine.calculate(&series, 25);
        assert!(machine.drain_events().is_empty());
    }

    #[test]
    fn stop_loss_fires_when_leg_start_is_crossed() {
        let mut values = rally_values();
        values.push(99.5); // below 99.902
        let series = CandleSeries::from_candles(
            TimeframeId::M1,
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| doji(v, i as i64))
                .collect(),
        );

        let mut machine = machine();
        feed(&mut machine, &series, 23);

        machine.calculate(&series, 24);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SignalEvent::StopLoss { level, trigger } => {
                assert!((level.value - 99.902).abs() < 1e-9);
                assert_eq!(trigger.value, 104.9);
            }
            other => panic!("expected StopLoss, got {other:?}"),
        }
        assert!(!machine.is_in_setup());
    }

    #[test]
    fn gap_bar_hitting_both_levels_resolves_as_take_profit() {
        let mut candles: Vec<Candle> = rally_values()
            .iter()
            .enumerate()
            .map(|(i, &v)| doji(v, i as i64))
            .collect();
        // Bar 24 trades through both the target and the stop.
        let t = Utc.timestamp_opt(1_700_000_000 + 24 * 60, 0).unwrap();
        candles.push(Candle::new(110.0, 121.0, 99.0, 115.0, t));
        let series = CandleSeries::from_candles(TimeframeId::M1, candles);

        let mut machine = machine();
        feed(&mut machine, &series, 23);

        machine.calculate(&series, 24);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SignalEvent::TakeProfit { .. }));
    }

    #[test]
    fn armed_pre_trigger_enters_on_tick() {
        let series = CandleSeries::from_candles(
            TimeframeId::M1,
            rally_values()
                .iter()
                .enumerate()
                .map(|(i, &v)| doji(v, i as i64))
                .collect(),
        );

        let mut machine = machine();
        // Bar 21 (106.0) touches the 0.4 pre-trigger at 106 but not the
        // 0.5 trigger at 105.
        let events = feed(&mut machine, &series, 21);
        assert!(events.is_empty());
        assert!(!machine.is_in_setup());

        machine.on_tick(&series, 104.95);
        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SignalEvent::Enter { level, .. } => {
                assert_eq!(level.value, 104.95);
                assert_eq!(level.bar_index, 21);
            }
            other => panic!("expected Enter, got {other:?}"),
        }
        assert!(machine.is_in_setup());
    }

    #[test]
    fn no_second_enter_while_a_setup_is_active() {
        let mut values = rally_values();
        values.push(104.8); // still between stop and target
        let series = CandleSeries::from_candles(
            TimeframeId::M1,
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| doji(v, i as i64))
                .collect(),
        );

        let mut machine = machine();
        feed(&mut machine, &series, 23);
        assert!(machine.is_in_setup());

        machine.calculate(&series, 24);
        assert!(machine.drain_events().is_empty());
        assert!(machine.is_in_setup());
    }
}
