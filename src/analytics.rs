pub mod anchor;
pub mod levels;
pub mod vwap;

use chrono::{DateTime, Utc};
use error_stack::{Report, bail};

use crate::error::AnalyticsError;
use crate::model::CandleSeries;

use anchor::default_anchors;
use levels::SupportResistance;
use vwap::{VwapSeries, anchored_vwap};

/// Trailing window used for support/resistance unless configured otherwise.
pub const DEFAULT_WINDOW: usize = 50;

/// Combined analytics for one candle series.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsResult {
    pub support: f64,
    pub resistance: f64,
    /// Anchors as requested, in the given order. Entries matching no candle
    /// are kept here but contribute nothing to `vwap`.
    pub anchors: Vec<DateTime<Utc>>,
    pub vwap: VwapSeries,
}

/// Runs the support/resistance and anchored VWAP calculators over a series.
///
/// Holds only configuration; every call recomputes from the series it is given.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    levels: SupportResistance,
}

impl Analyzer {
    pub fn new(window: usize) -> Result<Self, Report<AnalyticsError>> {
        Ok(Self {
            levels: SupportResistance::new(window)?,
        })
    }

    /// Analyze with the default anchors (highest high, then lowest low).
    pub fn analyze(&self, series: &CandleSeries) -> Result<AnalyticsResult, Report<AnalyticsError>> {
        let anchors = default_anchors(series)?;
        self.analyze_with_anchors(series, &anchors)
    }

    pub fn analyze_with_anchors(
        &self,
        series: &CandleSeries,
        anchors: &[DateTime<Utc>],
    ) -> Result<AnalyticsResult, Report<AnalyticsError>> {
        let band = self.levels.compute(series)?;
        let vwap = anchored_vwap(series, anchors)?;

        Ok(AnalyticsResult {
            support: band.support,
            resistance: band.resistance,
            anchors: anchors.to_vec(),
            vwap,
        })
    }
}

pub(crate) fn ensure_non_empty(series: &CandleSeries, context: &str) -> Result<(), Report<AnalyticsError>> {
    if series.is_empty() {
        bail!(AnalyticsError::InvalidInput {
            reason: format!("{context}: candle series is empty"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{minute, series};

    fn five_candles() -> CandleSeries {
        series(&[
            (11.0, 9.0, 10.0, 100.0),
            (13.0, 11.0, 12.0, 100.0),
            (10.0, 8.0, 9.0, 100.0),
            (16.0, 14.0, 15.0, 100.0),
            (12.0, 10.0, 11.0, 100.0),
        ])
    }

    #[test]
    fn five_candle_scenario() {
        let result = Analyzer::default().analyze(&five_candles()).unwrap();

        assert_eq!(result.support, 8.0);
        assert_eq!(result.resistance, 16.0);
        assert_eq!(result.anchors, vec![minute(3), minute(2)]);

        assert_eq!(result.vwap.len(), 5);
        assert_eq!(result.vwap[0], None);
        assert_eq!(result.vwap[1], None);
        // Min-low anchor (index 2) is applied last and owns the tail.
        assert!((result.vwap[2].unwrap() - 9.0).abs() < 1e-9);
        assert!((result.vwap[3].unwrap() - 12.0).abs() < 1e-9);
        assert!((result.vwap[4].unwrap() - 35.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_candle_series() {
        let s = series(&[(10.5, 9.5, 10.0, 3.0)]);
        let result = Analyzer::default().analyze(&s).unwrap();
        assert_eq!(result.support, 9.5);
        assert_eq!(result.resistance, 10.5);
        assert_eq!(result.vwap, vec![Some(10.0)]);
    }

    #[test]
    fn empty_series_is_invalid_input() {
        let err = Analyzer::default()
            .analyze(&CandleSeries::default())
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AnalyticsError::InvalidInput { .. }
        ));
    }

    #[test]
    fn custom_anchors_replace_defaults() {
        let analyzer = Analyzer::new(2).unwrap();
        let result = analyzer
            .analyze_with_anchors(&five_candles(), &[minute(4)])
            .unwrap();
        assert_eq!(result.support, 10.0);
        assert_eq!(result.resistance, 16.0);
        assert_eq!(result.vwap, vec![None, None, None, None, Some(11.0)]);
    }

    #[test]
    fn zero_window_rejected() {
        assert!(Analyzer::new(0).is_err());
    }

    #[test]
    fn analysis_is_reproducible() {
        let s = five_candles();
        let analyzer = Analyzer::default();
        assert_eq!(analyzer.analyze(&s).unwrap(), analyzer.analyze(&s).unwrap());
    }
}
