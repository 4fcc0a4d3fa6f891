//! Synthetic-pattern exchange records
//!
//! Language-neutral JSON schema shared with the external pattern
//! generator: short single-letter keys, model types as SCREAMING_SNAKE
//! strings. Keep the wire names stable; trainers and fixtures depend on
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bars::Candle;
use crate::point::BarPoint;

/// Elliott model label carried on generated patterns and waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElliottModelKind {
    Impulse,
    DiagonalContractingInitial,
    DiagonalContractingEnding,
    DiagonalExpandingInitial,
    DiagonalExpandingEnding,
    TriangleContracting,
    TriangleExpanding,
    TriangleRunning,
    Zigzag,
    DoubleZigzag,
    TripleZigzag,
    FlatRegular,
    FlatExtended,
    FlatRunning,
    Combination,
}

/// One exported candle. `hf` records whether the high printed before
/// the low inside the bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleExport {
    #[serde(rename = "d")]
    pub open_date: DateTime<Utc>,
    #[serde(rename = "hf")]
    pub is_high_first: bool,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
}

impl CandleExport {
    pub fn from_candle(candle: &Candle, is_high_first: bool) -> Self {
        Self {
            open_date: candle.open_time,
            is_high_first,
            open: candle.open,
            close: candle.close,
            high: candle.high,
            low: candle.low,
        }
    }
}

/// One labelled wave point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveExport {
    /// Wave name within its model, e.g. "1", "A".
    #[serde(rename = "n")]
    pub wave_name: String,
    #[serde(rename = "d")]
    pub date_time: DateTime<Utc>,
    #[serde(rename = "v")]
    pub value: f64,
    #[serde(rename = "type")]
    pub model: ElliottModelKind,
    /// Depth of the wave inside the nested model tree.
    #[serde(rename = "l")]
    pub level: u8,
}

impl WaveExport {
    pub fn from_point(
        wave_name: impl Into<String>,
        point: &BarPoint,
        model: ElliottModelKind,
        level: u8,
    ) -> Self {
        Self {
            wave_name: wave_name.into(),
            date_time: point.open_time,
            value: point.value,
            model,
            level,
        }
    }
}

/// A complete generated model: its candles, the nested child models,
/// and the wave labels grouped by degree level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedModelExport {
    #[serde(rename = "candles")]
    pub candles: Vec<CandleExport>,
    #[serde(rename = "models", default)]
    pub child_models: Vec<GeneratedModelExport>,
    #[serde(rename = "type")]
    pub model: ElliottModelKind,
    #[serde(rename = "Waves", default)]
    pub waves: Vec<Vec<WaveExport>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_names_are_stable() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let model = GeneratedModelExport {
            candles: vec![CandleExport {
                open_date: t,
                is_high_first: true,
                open: 1.0,
                close: 2.0,
                high: 2.5,
                low: 0.5,
            }],
            child_models: Vec::new(),
            model: ElliottModelKind::Impulse,
            waves: vec![vec![WaveExport {
                wave_name: "1".into(),
                date_time: t,
                value: 2.0,
                model: ElliottModelKind::Zigzag,
                level: 0,
            }]],
        };

        let json = serde_json::to_value(&model).unwrap();
        let candle = &json["candles"][0];
        for key in ["d", "hf", "o", "c", "h", "l"] {
            assert!(candle.get(key).is_some(), "missing candle key {key}");
        }
        assert_eq!(json["type"], "IMPULSE");
        let wave = &json["Waves"][0][0];
        assert_eq!(wave["n"], "1");
        assert_eq!(wave["type"], "ZIGZAG");
        assert_eq!(wave["l"], 0);
    }

    #[test]
    fn generator_payload_round_trips() {
        let json = r#"{
            "candles": [
                {"d": "2023-11-14T22:13:20Z", "hf": false, "o": 1.0, "c": 1.2, "h": 1.3, "l": 0.9}
            ],
            "models": [],
            "type": "DOUBLE_ZIGZAG",
            "Waves": [[
                {"n": "W", "d": "2023-11-14T22:13:20Z", "v": 1.3, "type": "ZIGZAG", "l": 1}
            ]]
        }"#;

        let model: GeneratedModelExport = serde_json::from_str(json).unwrap();
        assert_eq!(model.model, ElliottModelKind::DoubleZigzag);
        assert_eq!(model.waves[0][0].wave_name, "W");

        let back = serde_json::to_string(&model).unwrap();
        let again: GeneratedModelExport = serde_json::from_str(&back).unwrap();
        assert_eq!(model, again);
    }
}
