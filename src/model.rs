use std::fmt;

use chrono::{DateTime, Utc};
use error_stack::{Report, bail};

use crate::error::AnalyticsError;

/// Candle interval supported by the service.
///
/// String representations match the config file and query format (e.g. `"1m"`, `"1h"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
}

impl TimeFrame {
    /// Parse a config-format string into a `TimeFrame`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "3m" => Some(Self::Min3),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "30m" => Some(Self::Min30),
            "1h" => Some(Self::Hour1),
            "4h" => Some(Self::Hour4),
            "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min3 => "3m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }

    /// Return the Binance kline interval string for this timeframe.
    ///
    /// Binance uses the same notation as the config file.
    pub fn binance_interval(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One OHLCV observation. `open_time` identifies the candle inside a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered candles for a single instrument and interval.
///
/// Timestamps are strictly increasing and every numeric field is finite and
/// non-negative. An empty series is representable; the calculators reject it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Result<Self, Report<AnalyticsError>> {
        for (i, candle) in candles.iter().enumerate() {
            let fields = [
                ("open", candle.open),
                ("high", candle.high),
                ("low", candle.low),
                ("close", candle.close),
                ("volume", candle.volume),
            ];
            for (name, value) in fields {
                if !value.is_finite() || value < 0.0 {
                    bail!(AnalyticsError::InvalidInput {
                        reason: format!("candle[{i}].{name} must be finite and non-negative, got {value}"),
                    });
                }
            }

            if i > 0 && candles[i - 1].open_time >= candle.open_time {
                bail!(AnalyticsError::InvalidInput {
                    reason: format!(
                        "candle[{i}] at {} does not follow {}",
                        candle.open_time,
                        candles[i - 1].open_time
                    ),
                });
            }
        }
        Ok(Self { candles })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    /// Most recent candle.
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Index of the candle opening exactly at `timestamp`.
    pub fn position(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.candles
            .binary_search_by_key(&timestamp, |c| c.open_time)
            .ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }
}
