use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::DateTime;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{BinanceConfig, Credentials};
use crate::error::{ConfigError, DataFetchError};
use crate::exchange::MarketDataSource;
use crate::model::{Candle, CandleSeries, TimeFrame};

const PROVIDER: &str = "binance";
const MAX_CANDLES_PER_REQUEST: usize = 1000;
const API_KEY_HEADER: &str = "x-mbx-apikey";

pub struct BinanceExchange {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BinanceExchange {
    /// Build the REST client. Invalid settings surface here, at startup.
    pub fn new(config: &BinanceConfig, credentials: Credentials) -> Result<Self, Report<ConfigError>> {
        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            Report::new(ConfigError::Validation {
                field: "binance.requests_per_second must be > 0".into(),
            })
        })?;

        let mut api_key = HeaderValue::from_str(&credentials.api_key).change_context(
            ConfigError::Validation {
                field: format!("{} contains invalid header characters", config.api_key_env),
            },
        )?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .change_context(ConfigError::Validation {
                field: "binance http client".into(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }
}

impl MarketDataSource for BinanceExchange {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Result<CandleSeries, Report<DataFetchError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            // Wait for rate limiter before making the request
            self.rate_limiter.until_ready().await;

            let url = format!("{}/api/v3/klines", self.base_url);
            let fetch_limit = limit.min(MAX_CANDLES_PER_REQUEST);

            let limit_str = fetch_limit.to_string();
            let params = [
                ("symbol", symbol.as_str()),
                ("interval", timeframe.binance_interval()),
                ("limit", limit_str.as_str()),
            ];

            debug!(symbol = %symbol, timeframe = %timeframe, limit = fetch_limit, "requesting binance klines");

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(DataFetchError::Request {
                    provider: PROVIDER.into(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Report::new(DataFetchError::Request {
                    provider: PROVIDER.into(),
                })
                .attach(format!("HTTP status: {status}"))
                .attach(format!("body: {body}")));
            }

            let raw: Vec<BinanceKlineRow> =
                response
                    .json()
                    .await
                    .change_context(DataFetchError::ResponseParse {
                        provider: PROVIDER.into(),
                    })?;

            info!(
                symbol = %symbol,
                timeframe = %timeframe,
                fetched = raw.len(),
                "binance candle fetch complete"
            );

            let candles = raw
                .into_iter()
                .map(BinanceKlineRow::into_candle)
                .collect::<Result<Vec<_>, _>>()?;

            CandleSeries::new(candles).change_context(DataFetchError::ResponseParse {
                provider: PROVIDER.into(),
            })
        })
    }
}

// ── REST response types ───────────────────────────────────────────────────────

/// Binance kline row: 12-element array
/// [open_time, open, high, low, close, volume, close_time, ...]
#[derive(Debug, Deserialize)]
struct BinanceKlineRow(
    i64,                        // 0: open_time (ms)
    String,                     // 1: open
    String,                     // 2: high
    String,                     // 3: low
    String,                     // 4: close
    String,                     // 5: volume
    #[allow(dead_code)] i64,    // 6: close_time
    #[allow(dead_code)] String, // 7: quote asset volume
    #[allow(dead_code)] i64,    // 8: number of trades
    #[allow(dead_code)] String, // 9: taker buy base volume
    #[allow(dead_code)] String, // 10: taker buy quote volume
    #[allow(dead_code)] String, // 11: ignore
);

impl BinanceKlineRow {
    fn into_candle(self) -> Result<Candle, Report<DataFetchError>> {
        let parse_error = || DataFetchError::ResponseParse {
            provider: PROVIDER.into(),
        };
        let parse_f64 = |s: &str| -> Result<f64, Report<DataFetchError>> {
            s.parse::<f64>()
                .change_context_lazy(parse_error)
                .attach_with(|| format!("value: {s:?}"))
        };

        let open_time = DateTime::from_timestamp_millis(self.0).ok_or_else(|| {
            Report::new(parse_error()).attach(format!("open_time out of range: {}", self.0))
        })?;

        Ok(Candle {
            open_time,
            open: parse_f64(&self.1)?,
            high: parse_f64(&self.2)?,
            low: parse_f64(&self.3)?,
            close: parse_f64(&self.4)?,
            volume: parse_f64(&self.5)?,
        })
    }
}
