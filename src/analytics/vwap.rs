use chrono::{DateTime, Utc};
use error_stack::Report;
use tracing::debug;

use crate::analytics::ensure_non_empty;
use crate::error::AnalyticsError;
use crate::model::CandleSeries;

/// Per-candle VWAP aligned with the series; `None` where undefined.
pub type VwapSeries = Vec<Option<f64>>;

/// Anchored VWAP over `series`, restarting the cumulative sums at each anchor.
///
/// Anchors are applied in the order given and each one overwrites every
/// position from its candle to the end of the series, so the last anchor in
/// the list wins where ranges overlap. Anchors that match no candle are
/// skipped. Positions before the first matched anchor, and positions where
/// the cumulative volume is zero, are `None`.
pub fn anchored_vwap(
    series: &CandleSeries,
    anchors: &[DateTime<Utc>],
) -> Result<VwapSeries, Report<AnalyticsError>> {
    ensure_non_empty(series, "anchored vwap")?;

    let mut vwap: VwapSeries = vec![None; series.len()];

    for &anchor in anchors {
        let Some(start) = series.position(anchor) else {
            debug!(anchor = %anchor, "vwap anchor not in series, skipping");
            continue;
        };

        let mut cum_volume = 0.0;
        let mut cum_price_volume = 0.0;
        for (slot, candle) in vwap[start..].iter_mut().zip(&series.candles()[start..]) {
            cum_volume += candle.volume;
            cum_price_volume += candle.close * candle.volume;
            *slot = (cum_volume > 0.0).then(|| cum_price_volume / cum_volume);
        }
    }

    Ok(vwap)
}
