//! Candle storage and the read-only bar access interface
//!
//! The detection core never mutates market data: everything consumes a
//! `BarSource`, a random-access + sequential view over candles. The
//! in-memory `CandleSeries` implementation backs the CLI and tests; a
//! host platform can provide its own implementation over live feeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timeframe of a candle stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeframeId {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl TimeframeId {
    /// Bar duration for this timeframe.
    pub fn duration(&self) -> chrono::Duration {
        match self {
            TimeframeId::M1 => chrono::Duration::minutes(1),
            TimeframeId::M5 => chrono::Duration::minutes(5),
            TimeframeId::M15 => chrono::Duration::minutes(15),
            TimeframeId::M30 => chrono::Duration::minutes(30),
            TimeframeId::H1 => chrono::Duration::hours(1),
            TimeframeId::H4 => chrono::Duration::hours(4),
            TimeframeId::D1 => chrono::Duration::days(1),
        }
    }
}

impl std::fmt::Display for TimeframeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeframeId::M1 => write!(f, "m1"),
            TimeframeId::M5 => write!(f, "m5"),
            TimeframeId::M15 => write!(f, "m15"),
            TimeframeId::M30 => write!(f, "m30"),
            TimeframeId::H1 => write!(f, "h1"),
            TimeframeId::H4 => write!(f, "h4"),
            TimeframeId::D1 => write!(f, "d1"),
        }
    }
}

/// One OHLC candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(rename = "openTime")]
    pub open_time: DateTime<Utc>,
}

impl Candle {
    pub fn new(open: f64, high: f64, low: f64, close: f64, open_time: DateTime<Utc>) -> Self {
        Self {
            open,
            high,
            low,
            close,
            open_time,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Read-only view over a candle stream: random access by index plus
/// index lookup by time. Indices are consecutive and monotonically
/// increasing; the core assumes no gaps.
pub trait BarSource {
    fn high(&self, index: i64) -> f64;
    fn low(&self, index: i64) -> f64;
    fn open(&self, index: i64) -> f64;
    fn close(&self, index: i64) -> f64;
    fn open_time(&self, index: i64) -> DateTime<Utc>;

    /// Index of the bar whose open time equals (or, for intra-bar times,
    /// precedes) `time`.
    fn index_by_time(&self, time: DateTime<Utc>) -> Option<i64>;

    fn count(&self) -> i64;
    fn timeframe(&self) -> TimeframeId;

    /// Convenience: the candle at `index`.
    fn candle(&self, index: i64) -> Candle {
        Candle::new(
            self.open(index),
            self.high(index),
            self.low(index),
            self.close(index),
            self.open_time(index),
        )
    }
}

/// In-memory `BarSource` over an append-only candle vector.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    timeframe: TimeframeId,
    candles: Vec<Candle>,
    index_by_time: BTreeMap<DateTime<Utc>, i64>,
}

impl CandleSeries {
    pub fn new(timeframe: TimeframeId) -> Self {
        Self {
            timeframe,
            candles: Vec::new(),
            index_by_time: BTreeMap::new(),
        }
    }

    pub fn from_candles(timeframe: TimeframeId, candles: Vec<Candle>) -> Self {
        let mut series = Self::new(timeframe);
        for candle in candles {
            series.push(candle);
        }
        series
    }

    /// Append the next candle. Open times must be strictly increasing.
    pub fn push(&mut self, candle: Candle) {
        let index = self.candles.len() as i64;
        self.index_by_time.insert(candle.open_time, index);
        self.candles.push(candle);
    }

    pub fn last_index(&self) -> Option<i64> {
        if self.candles.is_empty() {
            None
        } else {
            Some(self.candles.len() as i64 - 1)
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    fn at(&self, index: i64) -> &Candle {
        &self.candles[index as usize]
    }
}

impl BarSource for CandleSeries {
    fn high(&self, index: i64) -> f64 {
        self.at(index).high
    }

    fn low(&self, index: i64) -> f64 {
        self.at(index).low
    }

    fn open(&self, index: i64) -> f64 {
        self.at(index).open
    }

    fn close(&self, index: i64) -> f64 {
        self.at(index).close
    }

    fn open_time(&self, index: i64) -> DateTime<Utc> {
        self.at(index).open_time
    }

    fn index_by_time(&self, time: DateTime<Utc>) -> Option<i64> {
        self.index_by_time.range(..=time).next_back().map(|(_, &i)| i)
    }

    fn count(&self) -> i64 {
        self.candles.len() as i64
    }

    fn timeframe(&self) -> TimeframeId {
        self.timeframe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(i: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap()
    }

    #[test]
    fn index_by_time_finds_containing_bar() {
        let mut series = CandleSeries::new(TimeframeId::M1);
        for i in 0..5 {
            series.push(Candle::new(1.0, 2.0, 0.5, 1.5, minute(i)));
        }

        assert_eq!(series.index_by_time(minute(3)), Some(3));
        // intra-bar time maps to the open bar
        let intra = minute(3) + chrono::Duration::seconds(30);
        assert_eq!(series.index_by_time(intra), Some(3));
        // before the first bar there is nothing
        let before = minute(0) - chrono::Duration::seconds(1);
        assert_eq!(series.index_by_time(before), None);
    }
}
