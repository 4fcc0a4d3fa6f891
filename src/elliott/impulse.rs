//! Wave-rule impulse classifier

use crate::bars::BarSource;
use crate::config::ImpulseConfig;
use crate::detect::ExtremumDetector;
use crate::point::BarPoint;

use super::{CorrectionKind, ImpulseResult, PatternOracle, WaveStructure};

/// Boundary points of a 5-wave impulse, endpoints included.
const IMPULSE_EXTREMA_COUNT: usize = 6;
/// Boundary points of an A-B-C zigzag, endpoints included.
const ZIGZAG_EXTREMA_COUNT: usize = 4;
/// A bare two-point movement with no resolved sub-structure.
const SIMPLE_EXTREMA_COUNT: usize = 2;

/// Classifies a leg between two bar points as a 5-wave impulse.
///
/// For each deviation scale from the caller's down to `zoom_min`, the
/// leg's internal extrema are re-detected and the canonical wave rules
/// checked: exactly six boundary points, both corrections taking real
/// time and keeping duration harmony, wave 4 staying out of wave 1's
/// price territory, all three motive waves advancing, wave 3 never the
/// shortest motive wave, and no motive wave resolving to a zigzag at a
/// finer scale. The first scale that satisfies all rules wins.
///
/// Stateless across calls apart from configuration; safe to share one
/// instance across many legs of the same stream.
pub struct ImpulseClassifier {
    config: ImpulseConfig,
    oracle: Option<Box<dyn PatternOracle>>,
}

impl ImpulseClassifier {
    pub fn new(config: ImpulseConfig) -> Self {
        Self {
            config,
            oracle: None,
        }
    }

    /// Attach an external model consulted only when the wave rules fail
    /// at every scanned scale.
    pub fn with_oracle(config: ImpulseConfig, oracle: Box<dyn PatternOracle>) -> Self {
        Self {
            config,
            oracle: Some(oracle),
        }
    }

    /// Whether the movement `start -> end` is a 5-wave impulse when its
    /// sub-structure is resolved starting from `scale`.
    pub fn is_impulse(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> bool {
        if self.classify(source, start, end, scale).is_some() {
            return true;
        }

        match &self.oracle {
            Some(oracle) => oracle.predict(start, end) == Some(WaveStructure::Impulse),
            None => false,
        }
    }

    /// Full classification: the six wave boundary points plus the
    /// corrective sub-wave kinds, or `None` if no scanned scale yields a
    /// valid impulse. Ambiguous input (under 3 bars, zero-length
    /// movement) is `None`, never an error.
    pub fn classify(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> Option<ImpulseResult> {
        if end.bar_index - start.bar_index < 3 {
            return None;
        }
        if (end.value - start.value).abs() < f64::EPSILON {
            return None;
        }

        // A leg that reads as corrective at any scale is not an impulse.
        if self.is_zigzag(source, start, end, scale) {
            return None;
        }
        if self.is_double_zigzag(source, start, end, scale) {
            return None;
        }

        for dv in self.zoom_scales(scale) {
            if let Some(result) = self.simple_impulse(source, start, end, dv) {
                return Some(result);
            }
        }

        None
    }

    /// Whether the leg resolves to a 4-point zigzag at any scale from
    /// `scale` down to `zoom_min`.
    pub fn is_zigzag(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> bool {
        self.zoom_scales(scale)
            .into_iter()
            .any(|dv| self.is_zigzag_at(source, start, end, dv))
    }

    /// Zigzag check at one fixed scale. Exactly four points is a
    /// zigzag; a longer series still counts when its second point
    /// overlaps the sub-last one (the connector failed to make a new
    /// extreme, the shape is corrective).
    pub fn is_zigzag_at(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> bool {
        let extrema = self.normalized_extrema(source, start, end, scale);
        let count = extrema.len();

        if count < ZIGZAG_EXTREMA_COUNT {
            return false;
        }
        if count == ZIGZAG_EXTREMA_COUNT {
            return true;
        }

        let second = &extrema[1];
        let sub_last = &extrema[count - 2];
        let is_up = extrema[0] < extrema[count - 1];

        (is_up && second > sub_last) || (!is_up && second < sub_last)
    }

    /// Whether the leg is two zigzags joined by an overlapping
    /// connector at any scale from `scale` down to `zoom_min`.
    pub fn is_double_zigzag(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> bool {
        let is_up = start < end;
        for dv in self.zoom_scales(scale) {
            let extrema = self.normalized_extrema(source, start, end, dv);
            let count = extrema.len();
            if count < ZIGZAG_EXTREMA_COUNT {
                continue;
            }

            let second = &extrema[1];
            let sub_last = &extrema[count - 2];
            let overlap = (is_up && second > sub_last) || (!is_up && second < sub_last);

            if overlap
                && self.is_zigzag(source, &extrema[0], &extrema[1], dv)
                && self.is_zigzag(source, &extrema[count - 2], &extrema[count - 1], dv)
            {
                return true;
            }
        }

        false
    }

    /// The wave rules at one fixed scale.
    fn simple_impulse(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        dv: u32,
    ) -> Option<ImpulseResult> {
        let extrema = self.normalized_extrema(source, start, end, dv);
        let count = extrema.len();

        if count <= SIMPLE_EXTREMA_COUNT || count == ZIGZAG_EXTREMA_COUNT {
            return None;
        }
        if count != IMPULSE_EXTREMA_COUNT {
            return None;
        }

        let wave0 = &extrema[0];
        let wave1 = &extrema[1];
        let wave2 = &extrema[2];
        let wave3 = &extrema[3];
        let wave4 = &extrema[4];
        let wave5 = &extrema[5];

        // Both corrections must take real time.
        let second_duration = (wave2.open_time - wave1.open_time).num_seconds();
        let fourth_duration = (wave4.open_time - wave3.open_time).num_seconds();
        if second_duration <= 0 || fourth_duration <= 0 {
            return None;
        }

        // Harmony between the 2nd and the 4th waves. Real alternation
        // forbids two corrections with near-identical proportions far
        // outside the allowed band.
        let allowance = self.config.correction_allowance_percent;
        let correction_ratio = fourth_duration as f64 / second_duration as f64;
        if correction_ratio * 100.0 > allowance || correction_ratio < 100.0 / allowance {
            return None;
        }

        let is_up = start.value < end.value;

        // Wave 4 must stay out of wave 1's price territory.
        if (is_up && wave1.value >= wave4.value) || (!is_up && wave1.value <= wave4.value) {
            return None;
        }

        let sign = if is_up { 1.0 } else { -1.0 };
        let first_length = sign * (wave1.value - wave0.value);
        let third_length = sign * (wave3.value - wave2.value);
        let fifth_length = sign * (wave5.value - wave4.value);
        if first_length <= 0.0 || third_length <= 0.0 || fifth_length <= 0.0 {
            return None;
        }

        // Wave 3 is never the shortest motive wave.
        if third_length < first_length && third_length < fifth_length {
            return None;
        }

        // Motive waves must not be corrective at any finer scale.
        for zoom in self.zoom_scales(dv) {
            if self.is_zigzag_at(source, wave0, wave1, zoom)
                || self.is_zigzag_at(source, wave2, wave3, zoom)
                || self.is_zigzag_at(source, wave4, wave5, zoom)
            {
                return None;
            }
        }

        let wave2_kind = self.correction_kind(source, wave1, wave2, dv);
        let wave4_kind = self.correction_kind(source, wave3, wave4, dv);

        Some(ImpulseResult {
            wave0: wave0.clone(),
            wave1: wave1.clone(),
            wave2: wave2.clone(),
            wave3: wave3.clone(),
            wave4: wave4.clone(),
            wave5: wave5.clone(),
            wave2_kind,
            wave4_kind,
        })
    }

    fn correction_kind(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> CorrectionKind {
        if self.is_double_zigzag(source, start, end, scale) {
            CorrectionKind::DoubleZigzag
        } else if self.is_zigzag(source, start, end, scale) {
            CorrectionKind::Zigzag
        } else {
            CorrectionKind::Simple
        }
    }

    /// Re-detect the leg's extrema at `scale` and pin the endpoints:
    /// boundary entries are overwritten with the caller's exact prices,
    /// missing endpoints are inserted, and same-direction neighbors are
    /// collapsed so the remaining points strictly alternate.
    fn normalized_extrema(
        &self,
        source: &dyn BarSource,
        start: &BarPoint,
        end: &BarPoint,
        scale: u32,
    ) -> Vec<BarPoint> {
        let is_up = start < end;
        let mut detector = ExtremumDetector::with_direction(scale, is_up);
        detector.calculate_range(source, start.bar_index, end.bar_index);
        let mut extrema = detector.to_list();

        if extrema.is_empty() {
            extrema.push(start.clone());
            extrema.push(end.clone());
        } else {
            if extrema[0].open_time == start.open_time {
                extrema[0].value = start.value;
            } else {
                extrema.insert(0, start.clone());
            }

            let last = extrema.len() - 1;
            if extrema[last].open_time == end.open_time {
                extrema[last].value = end.value;
            } else {
                extrema.push(end.clone());
            }
        }

        if extrema.len() < ZIGZAG_EXTREMA_COUNT {
            return extrema;
        }

        // Leave only true turning points.
        let mut to_delete: Vec<usize> = Vec::new();
        let mut direction = start > end;
        for i in 1..extrema.len() {
            let new_direction = extrema[i - 1] < extrema[i];
            if direction == new_direction {
                to_delete.push(i - 1);
            }
            direction = new_direction;
        }
        for index in to_delete.into_iter().rev() {
            extrema.remove(index);
        }

        extrema
    }

    /// Scales from `top` down to `zoom_min`, inclusive.
    fn zoom_scales(&self, top: u32) -> Vec<u32> {
        let mut scales = Vec::new();
        let mut dv = top;
        while dv >= self.config.zoom_min {
            scales.push(dv);
            match dv.checked_sub(self.config.zoom_step.max(1)) {
                Some(next) => dv = next,
                None => break,
            }
        }
        scales
    }
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

    fn point(source: &CandleSeries, index: i64) -> BarPoint {
        use crate::bars::BarSource;
        BarPoint::new(
            source.close(index),
            source.open_time(index),
            index,
            TimeframeId::M1,
        )
    }

    /// 5 clean waves: 100-110, pullback to 105, 105-130, pullback to
    /// 124, 124-135. Wave 3 is the longest.
    fn clean_impulse() -> Vec<f64> {
        vec![
            100.0, 102.0, 104.0, 106.0, 108.0, 110.0, // wave 1
            108.0, 106.5, 105.0, // wave 2
            109.0, 113.0, 117.0, 121.0, 125.0, 128.0, 130.0, // wave 3
            128.0, 127.0, 125.5, 124.0, // wave 4
            127.0, 130.0, 133.0, 135.0, // wave 5
        ]
    }

    #[test]
    fn clean_five_wave_leg_classifies() {
        let series = doji_series(&clean_impulse());
        let start = point(&series, 0);
        let end = point(&series, 23);

        let classifier = ImpulseClassifier::new(ImpulseConfig::default());
        let result = classifier
            .classify(&series, &start, &end, 100)
            .unwrap_or_else(|| panic!("leg should classify as an impulse"));

        assert!(result.is_up());
        assert_eq!(result.wave1.value, 110.0);
        assert_eq!(result.wave1.bar_index, 5);
        assert_eq!(result.wave2.value, 105.0);
        assert_eq!(result.wave3.value, 130.0);
        assert_eq!(result.wave4.value, 124.0);
        assert_eq!(result.wave5.value, 135.0);
        assert_eq!(result.wave2_kind, CorrectionKind::Simple);
        assert_eq!(result.wave4_kind, CorrectionKind::Simple);
        assert!(classifier.is_impulse(&series, &start, &end, 100));
    }

    #[test]
    fn shortest_third_wave_is_rejected() {
        // Wave lengths 10 / 9 / 10: the third wave is the shortest.
        let values = vec![
            100.0, 102.5, 105.0, 107.5, 110.0, // wave 1: 100 -> 110
            108.0, 106.5, 105.0, // wave 2: -> 105
            107.0, 109.5, 112.0, 114.0, // wave 3: -> 114
            113.0, 112.0, 111.0, // wave 4: -> 111 (no wave-1 overlap)
            113.5, 116.0, 118.5, 121.0, // wave 5: -> 121
        ];
        let series = doji_series(&values);
        let start = point(&series, 0);
        let end = point(&series, 18);

        let classifier = ImpulseClassifier::new(ImpulseConfig::default());
        assert!(!classifier.is_impulse(&series, &start, &end, 100));
    }

    #[test]
    fn three_leg_zigzag_is_not_an_impulse() {
        let values = vec![
            100.0, 103.0, 106.0, 110.0, // A
            108.0, 106.0, 104.0, // B
            108.0, 112.0, 116.0, 120.0, // C
        ];
        let series = doji_series(&values);
        let start = point(&series, 0);
        let end = point(&series, 10);

        let classifier = ImpulseClassifier::new(ImpulseConfig::default());
        assert!(classifier.is_zigzag(&series, &start, &end, 100));
        assert!(!classifier.is_impulse(&series, &start, &end, 100));
    }

    #[test]
    fn wave_four_overlap_is_rejected() {
        // Wave 4 dips to 109, inside wave 1's territory (ends at 110).
        let values = vec![
            100.0, 102.0, 104.0, 106.0, 108.0, 110.0, // wave 1
            108.0, 106.5, 105.0, // wave 2
            109.0, 113.0, 117.0, 121.0, 125.0, 128.0, 130.0, // wave 3
            124.0, 118.0, 113.0, 109.0, // wave 4, overlapping
            115.0, 122.0, 129.0, 135.0, // wave 5
        ];
        let series = doji_series(&values);
        let start = point(&series, 0);
        let end = point(&series, 23);

        let classifier = ImpulseClassifier::new(ImpulseConfig::default());
        assert!(classifier.classify(&series, &start, &end, 100).is_none());
    }

    #[test]
    fn oracle_breaks_ties_when_rules_fail() {
        struct AlwaysImpulse;
        impl PatternOracle for AlwaysImpulse {
            fn predict(&self, _start: &BarPoint, _end: &BarPoint) -> Option<WaveStructure> {
                Some(WaveStructure::Impulse)
            }
        }

        // A bare ramp has no resolvable sub-structure at any scale.
        let values: Vec<f64> = (0..12).map(|i| 100.0 + f64::from(i)).collect();
        let series = doji_series(&values);
        let start = point(&series, 0);
        let end = point(&series, 11);

        let plain = ImpulseClassifier::new(ImpulseConfig::default());
        assert!(!plain.is_impulse(&series, &start, &end, 100));

        let assisted =
            ImpulseClassifier::with_oracle(ImpulseConfig::default(), Box::new(AlwaysImpulse));
        assert!(assisted.is_impulse(&series, &start, &end, 100));
    }

    #[test]
    fn degenerate_input_is_rejected_quietly() {
        let series = doji_series(&[100.0, 101.0, 102.0, 103.0]);
        let classifier = ImpulseClassifier::new(ImpulseConfig::default());

        // Under 3 bars.
        let start = point(&series, 0);
        let near = point(&series, 2);
        assert!(classifier.classify(&series, &start, &near, 100).is_none());

        // Zero-length movement.
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let flat_start = BarPoint::new(100.0, t, 0, TimeframeId::M1);
        let flat_end = BarPoint::new(100.0, t + chrono::Duration::minutes(3), 3, TimeframeId::M1);
        assert!(classifier
            .classify(&series, &flat_start, &flat_end, 100)
            .is_none());
    }
}
