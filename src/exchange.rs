pub mod binance;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::DataFetchError;
use crate::model::{CandleSeries, TimeFrame};

/// Supplier of recent candles for one instrument.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn MarketDataSource`).
pub trait MarketDataSource: Send + Sync {
    /// Provider name used in logs and error messages (e.g. "binance").
    fn name(&self) -> &str;

    /// Fetch up to `limit` of the most recent candles, oldest first.
    ///
    /// Failures are reported once; callers do not retry.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Result<CandleSeries, Report<DataFetchError>>>;
}
