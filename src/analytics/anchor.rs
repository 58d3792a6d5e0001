use chrono::{DateTime, Utc};
use error_stack::{Report, bail};

use crate::error::AnalyticsError;
use crate::model::CandleSeries;

/// Default VWAP anchors: the candle with the highest high, then the candle
/// with the lowest low. Ties resolve to the earliest candle.
///
/// The order is fixed (max-high first) and does not depend on which of the
/// two candles comes first in time.
pub fn default_anchors(series: &CandleSeries) -> Result<Vec<DateTime<Utc>>, Report<AnalyticsError>> {
    let Some(first) = series.get(0) else {
        bail!(AnalyticsError::InvalidInput {
            reason: "default anchors: candle series is empty".into(),
        });
    };

    let (highest, lowest) = series
        .iter()
        .skip(1)
        .fold((first, first), |(highest, lowest), candle| {
            (
                if candle.high > highest.high { candle } else { highest },
                if candle.low < lowest.low { candle } else { lowest },
            )
        });

    Ok(vec![highest.open_time, lowest.open_time])
}
