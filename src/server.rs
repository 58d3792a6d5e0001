use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use error_stack::Report;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};

use crate::analytics::{AnalyticsResult, Analyzer};
use crate::config::{AppConfig, MAX_CANDLE_LIMIT};
use crate::error::{AnalyticsError, ConfigError};
use crate::exchange::MarketDataSource;
use crate::model::{CandleSeries, TimeFrame};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Instrument, interval, candle count and window used when `/data` is called
/// without overrides.
#[derive(Debug, Clone)]
pub struct MarketDefaults {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub limit: usize,
    pub window: usize,
}

impl MarketDefaults {
    pub fn from_config(config: &AppConfig) -> Result<Self, Report<ConfigError>> {
        Ok(Self {
            symbol: config.market.symbol.clone(),
            timeframe: config.timeframe()?,
            limit: config.market.limit,
            window: config.analytics.window,
        })
    }

    fn resolve(&self, query: DataQuery) -> Result<DataRequest, Report<AnalyticsError>> {
        let symbol = match query.symbol {
            Some(symbol) if symbol.trim().is_empty() => {
                return Err(invalid_parameter("symbol must not be empty"));
            }
            Some(symbol) => symbol.trim().to_uppercase(),
            None => self.symbol.clone(),
        };

        let timeframe = match query.interval {
            Some(interval) => TimeFrame::from_str(&interval).ok_or_else(|| {
                invalid_parameter(&format!("unknown interval \"{interval}\""))
            })?,
            None => self.timeframe,
        };

        let limit = query.limit.unwrap_or(self.limit);
        if limit == 0 || limit > MAX_CANDLE_LIMIT {
            return Err(invalid_parameter(&format!(
                "limit must be between 1 and {MAX_CANDLE_LIMIT}"
            )));
        }

        let window = query.window.unwrap_or(self.window);
        if window == 0 {
            return Err(invalid_parameter("window must be > 0"));
        }

        let anchors = query.anchors.as_deref().map(parse_anchors).transpose()?;

        Ok(DataRequest {
            symbol,
            timeframe,
            limit,
            window,
            anchors,
        })
    }
}

/// Comma-separated open times in epoch milliseconds, kept in the given order.
fn parse_anchors(raw: &str) -> Result<Vec<DateTime<Utc>>, Report<AnalyticsError>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| {
                    invalid_parameter(&format!(
                        "anchor \"{part}\" is not an epoch-millisecond timestamp"
                    ))
                })
        })
        .collect()
}

fn invalid_parameter(name: &str) -> Report<AnalyticsError> {
    Report::new(AnalyticsError::InvalidParameter { name: name.into() })
}

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn MarketDataSource>,
    pub defaults: Arc<MarketDefaults>,
}

impl AppState {
    pub fn new(source: Arc<dyn MarketDataSource>, defaults: MarketDefaults) -> Self {
        Self {
            source,
            defaults: Arc::new(defaults),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DataQuery {
    symbol: Option<String>,
    interval: Option<String>,
    limit: Option<usize>,
    window: Option<usize>,
    anchors: Option<String>,
}

#[derive(Debug)]
struct DataRequest {
    symbol: String,
    timeframe: TimeFrame,
    limit: usize,
    window: usize,
    /// Caller-supplied VWAP anchors; `None` selects the default anchors.
    anchors: Option<Vec<DateTime<Utc>>>,
}

/// `/data` payload: the fetched candles as parallel arrays plus the analytics.
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub time: Vec<String>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub support: f64,
    pub resistance: f64,
    pub anchors: Vec<String>,
    pub vwap: Vec<Option<f64>>,
}

impl DataResponse {
    fn new(series: &CandleSeries, result: AnalyticsResult) -> Self {
        let candles = series.candles();
        Self {
            time: candles
                .iter()
                .map(|c| c.open_time.format(TIME_FORMAT).to_string())
                .collect(),
            open: candles.iter().map(|c| c.open).collect(),
            high: candles.iter().map(|c| c.high).collect(),
            low: candles.iter().map(|c| c.low).collect(),
            close: candles.iter().map(|c| c.close).collect(),
            volume: candles.iter().map(|c| c.volume).collect(),
            support: result.support,
            resistance: result.resistance,
            anchors: result
                .anchors
                .iter()
                .map(|t| t.format(TIME_FORMAT).to_string())
                .collect(),
            vwap: result.vwap,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

async fn home(State(state): State<AppState>) -> String {
    format!(
        "{} analytics service is running! Go to /data to see market data.",
        state.defaults.symbol
    )
}

async fn data(
    State(state): State<AppState>,
    query: Result<Query<DataQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            debug!(error = %rejection, "malformed /data query");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let request = match state.defaults.resolve(query) {
        Ok(request) => request,
        Err(report) => {
            debug!(error = ?report, "rejected /data query");
            return error_response(StatusCode::BAD_REQUEST, report.current_context().to_string());
        }
    };

    let series = match state
        .source
        .fetch_candles(&request.symbol, request.timeframe, request.limit)
        .await
    {
        Ok(series) => series,
        Err(report) => {
            warn!(
                source = state.source.name(),
                symbol = %request.symbol,
                error = ?report,
                "candle fetch failed"
            );
            // Fetch failures are reported in the body with a 200, as the
            // dashboard client expects.
            return error_response(StatusCode::OK, report.current_context().to_string());
        }
    };

    let analysis = Analyzer::new(request.window).and_then(|analyzer| match &request.anchors {
        Some(anchors) => analyzer.analyze_with_anchors(&series, anchors),
        None => analyzer.analyze(&series),
    });
    match analysis {
        Ok(result) => {
            info!(
                symbol = %request.symbol,
                timeframe = %request.timeframe,
                candles = series.len(),
                last_close = series.last().map(|c| c.close),
                window = request.window,
                support = result.support,
                resistance = result.resistance,
                "analytics computed"
            );
            Json(DataResponse::new(&series, result)).into_response()
        }
        Err(report) => {
            warn!(symbol = %request.symbol, error = ?report, "analytics failed");
            error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                report.current_context().to_string(),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/data", get(data))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum_test::TestServer;
    use futures::future::BoxFuture;
    use serde_json::{Value, json};

    use super::*;
    use crate::error::DataFetchError;
    use crate::model::test_support::series;

    /// Source returning a fixed series (or failing) and recording each request.
    struct StubSource {
        series: Option<CandleSeries>,
        requests: Mutex<Vec<(String, TimeFrame, usize)>>,
    }

    impl StubSource {
        fn returning(series: CandleSeries) -> Arc<Self> {
            Arc::new(Self {
                series: Some(series),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                series: None,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl MarketDataSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch_candles(
            &self,
            symbol: &str,
            timeframe: TimeFrame,
            limit: usize,
        ) -> BoxFuture<'_, Result<CandleSeries, Report<DataFetchError>>> {
            self.requests
                .lock()
                .unwrap()
                .push((symbol.to_owned(), timeframe, limit));
            let result = self.series.clone().ok_or_else(|| {
                Report::new(DataFetchError::Request {
                    provider: "stub".into(),
                })
            });
            Box::pin(async move { result })
        }
    }

    fn defaults() -> MarketDefaults {
        MarketDefaults {
            symbol: "BTCUSDT".into(),
            timeframe: TimeFrame::Min1,
            limit: 500,
            window: 50,
        }
    }

    fn five_candles() -> CandleSeries {
        series(&[
            (11.0, 9.0, 10.0, 100.0),
            (13.0, 11.0, 12.0, 100.0),
            (10.0, 8.0, 9.0, 100.0),
            (16.0, 14.0, 15.0, 100.0),
            (12.0, 10.0, 11.0, 100.0),
        ])
    }

    fn test_server(source: Arc<StubSource>) -> TestServer {
        let state = AppState::new(source, defaults());
        TestServer::new(create_router(state)).expect("start test server")
    }

    #[tokio::test]
    async fn home_reports_running() {
        let server = test_server(StubSource::returning(five_candles()));
        let response = server.get("/").await;
        assert_eq!(response.status_code(), 200);
        assert!(response.text().contains("BTCUSDT analytics service is running"));
    }

    #[tokio::test]
    async fn data_returns_parallel_arrays_and_analytics() {
        let source = StubSource::returning(five_candles());
        let server = test_server(source.clone());

        let response = server.get("/data").await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        for field in ["time", "open", "high", "low", "close", "volume", "vwap"] {
            assert_eq!(body[field].as_array().unwrap().len(), 5, "{field}");
        }
        assert_eq!(body["time"][0], "2024-01-01 00:00:00");
        assert_eq!(body["high"], json!([11.0, 13.0, 10.0, 16.0, 12.0]));
        assert_eq!(body["support"], 8.0);
        assert_eq!(body["resistance"], 16.0);
        assert_eq!(body["anchors"], json!(["2024-01-01 00:03:00", "2024-01-01 00:02:00"]));

        let vwap = body["vwap"].as_array().unwrap();
        assert!(vwap[0].is_null());
        assert!(vwap[1].is_null());
        assert!((vwap[2].as_f64().unwrap() - 9.0).abs() < 1e-9);
        assert!((vwap[3].as_f64().unwrap() - 12.0).abs() < 1e-9);
        assert!((vwap[4].as_f64().unwrap() - 35.0 / 3.0).abs() < 1e-9);

        let requests = source.requests.lock().unwrap();
        assert_eq!(*requests, vec![("BTCUSDT".to_owned(), TimeFrame::Min1, 500)]);
    }

    #[tokio::test]
    async fn query_overrides_defaults() {
        let source = StubSource::returning(five_candles());
        let server = test_server(source.clone());

        let response = server
            .get("/data")
            .add_query_param("symbol", "ethusdt")
            .add_query_param("interval", "15m")
            .add_query_param("limit", 100)
            .add_query_param("window", 2)
            .await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        assert_eq!(body["support"], 10.0);
        assert_eq!(body["resistance"], 16.0);

        let requests = source.requests.lock().unwrap();
        assert_eq!(*requests, vec![("ETHUSDT".to_owned(), TimeFrame::Min15, 100)]);
    }

    #[tokio::test]
    async fn fetch_failure_returns_error_body() {
        let server = test_server(StubSource::failing());
        let response = server.get("/data").await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        assert_eq!(body, json!({"error": "request to stub failed"}));
    }

    #[tokio::test]
    async fn empty_series_is_unprocessable() {
        let server = test_server(StubSource::returning(CandleSeries::default()));
        let response = server.get("/data").expect_failure().await;
        assert_eq!(response.status_code(), 422);

        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().contains("empty"));
        assert!(body.get("support").is_none());
    }

    #[tokio::test]
    async fn invalid_query_parameters_rejected_before_fetch() {
        let source = StubSource::returning(five_candles());
        let server = test_server(source.clone());

        for (key, value) in [("interval", "2m"), ("limit", "0"), ("limit", "1001"), ("window", "0")] {
            let response = server
                .get("/data")
                .add_query_param(key, value)
                .expect_failure()
                .await;
            assert_eq!(response.status_code(), 400, "{key}={value}");
        }
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_numeric_parameters_get_json_error() {
        let source = StubSource::returning(five_candles());
        let server = test_server(source.clone());

        for (key, value) in [("limit", "abc"), ("window", "-1")] {
            let response = server
                .get("/data")
                .add_query_param(key, value)
                .expect_failure()
                .await;
            assert_eq!(response.status_code(), 400, "{key}={value}");
            let body: Value = response.json();
            assert!(body["error"].is_string(), "{key}={value}");
        }
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn huge_window_uses_whole_series() {
        let server = test_server(StubSource::returning(five_candles()));
        for window in [usize::MAX.to_string(), "10000000000000".to_owned()] {
            let response = server
                .get("/data")
                .add_query_param("window", &window)
                .await;
            assert_eq!(response.status_code(), 200, "window={window}");

            let body: Value = response.json();
            assert_eq!(body["support"], 8.0);
            assert_eq!(body["resistance"], 16.0);
        }
    }

    #[tokio::test]
    async fn custom_anchors_in_query_order() {
        let server = test_server(StubSource::returning(five_candles()));
        // 2024-01-01 00:01 and 00:04 UTC; the later entry in the list wins.
        let response = server
            .get("/data")
            .add_query_param("anchors", "1704067440000,1704067260000,1")
            .await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        let vwap = body["vwap"].as_array().unwrap();
        assert!(vwap[0].is_null());
        assert!((vwap[1].as_f64().unwrap() - 12.0).abs() < 1e-9);
        assert!((vwap[4].as_f64().unwrap() - 11.75).abs() < 1e-9);
        assert_eq!(
            body["anchors"],
            json!(["2024-01-01 00:04:00", "2024-01-01 00:01:00", "1970-01-01 00:00:00"])
        );
    }

    #[tokio::test]
    async fn malformed_anchor_rejected() {
        let server = test_server(StubSource::returning(five_candles()));
        let response = server
            .get("/data")
            .add_query_param("anchors", "yesterday")
            .expect_failure()
            .await;
        assert_eq!(response.status_code(), 400);
    }

    #[test]
    fn defaults_resolve_without_query() {
        let request = defaults().resolve(DataQuery::default()).unwrap();
        assert_eq!(request.symbol, "BTCUSDT");
        assert_eq!(request.timeframe, TimeFrame::Min1);
        assert_eq!(request.limit, 500);
        assert_eq!(request.window, 50);
        assert!(request.anchors.is_none());
    }

    #[test]
    fn defaults_built_from_config() {
        let config: AppConfig = toml::from_str("[market]\ninterval = \"4h\"\nlimit = 42\n").unwrap();
        let defaults = MarketDefaults::from_config(&config).unwrap();
        assert_eq!(defaults.timeframe, TimeFrame::Hour4);
        assert_eq!(defaults.limit, 42);
        assert_eq!(defaults.window, 50);
    }
}
