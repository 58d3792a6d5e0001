use std::collections::VecDeque;

use error_stack::{Report, bail};

use crate::analytics::{DEFAULT_WINDOW, ensure_non_empty};
use crate::error::AnalyticsError;
use crate::model::CandleSeries;

/// Support (lowest low) and resistance (highest high) over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingBand {
    pub support: f64,
    pub resistance: f64,
}

/// Rolling-extrema support/resistance over the trailing `window` candles.
///
/// Near the start of a series, or when the series is shorter than the window,
/// the window shrinks to the candles available; there is no warm-up period.
#[derive(Debug, Clone)]
pub struct SupportResistance {
    window: usize,
}

impl SupportResistance {
    pub fn new(window: usize) -> Result<Self, Report<AnalyticsError>> {
        if window == 0 {
            bail!(AnalyticsError::InvalidParameter {
                name: "window must be > 0".into(),
            });
        }
        Ok(Self { window })
    }

    /// Band for the most recent candle.
    pub fn compute(&self, series: &CandleSeries) -> Result<RollingBand, Report<AnalyticsError>> {
        let bands = self.rolling(series)?;
        bands.last().copied().ok_or_else(|| {
            Report::new(AnalyticsError::InvalidInput {
                reason: "support/resistance: candle series is empty".into(),
            })
        })
    }

    /// Band at every index of the series, each over the trailing
    /// `min(window, i + 1)` candles.
    pub fn rolling(&self, series: &CandleSeries) -> Result<Vec<RollingBand>, Report<AnalyticsError>> {
        ensure_non_empty(series, "support/resistance")?;

        let candles = series.candles();
        // Monotonic deques of candle indices: highs non-increasing, lows non-decreasing.
        // Neither can hold more than the series, whatever the window.
        let capacity = self.window.min(candles.len());
        let mut highs: VecDeque<usize> = VecDeque::with_capacity(capacity);
        let mut lows: VecDeque<usize> = VecDeque::with_capacity(capacity);
        let mut bands = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            while highs.back().is_some_and(|&j| candles[j].high <= candle.high) {
                highs.pop_back();
            }
            highs.push_back(i);

            while lows.back().is_some_and(|&j| candles[j].low >= candle.low) {
                lows.pop_back();
            }
            lows.push_back(i);

            let oldest = (i + 1).saturating_sub(self.window);
            while highs.front().is_some_and(|&j| j < oldest) {
                highs.pop_front();
            }
            while lows.front().is_some_and(|&j| j < oldest) {
                lows.pop_front();
            }

            // Both deques hold at least index `i` here.
            bands.push(RollingBand {
                support: candles[lows[0]].low,
                resistance: candles[highs[0]].high,
            });
        }

        Ok(bands)
    }
}

impl Default for SupportResistance {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}
