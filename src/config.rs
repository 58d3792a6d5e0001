use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::TimeFrame;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Upper bound on candles per request, matching Binance's kline endpoint.
pub const MAX_CANDLE_LIMIT: usize = 1000;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_bind() -> String {
    "127.0.0.1:5000".into()
}

fn default_source() -> String {
    "binance".into()
}

fn default_symbol() -> String {
    "BTCUSDT".into()
}

fn default_interval() -> String {
    "1m".into()
}

fn default_limit() -> usize {
    500
}

fn default_window() -> usize {
    crate::analytics::DEFAULT_WINDOW
}

fn default_binance_base_url() -> String {
    "https://api.binance.com".into()
}

fn default_requests_per_second() -> u32 {
    20
}

fn default_api_key_env() -> String {
    "BINANCE_API_KEY".into()
}

fn default_api_secret_env() -> String {
    "BINANCE_API_SECRET".into()
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Instrument and candle window served by `/data` when the request does not
/// override them.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            symbol: default_symbol(),
            interval: default_interval(),
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    #[serde(default = "default_binance_base_url")]
    pub base_url: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Name of the environment variable holding the API secret.
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_binance_base_url(),
            requests_per_second: default_requests_per_second(),
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
        }
    }
}

impl AppConfig {
    /// Validated bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, Report<ConfigError>> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .change_context(ConfigError::Validation {
                field: format!("server.bind \"{}\" is not a socket address", self.server.bind),
            })
    }

    /// Default timeframe for `/data`; `market.interval` is checked at load time.
    pub fn timeframe(&self) -> Result<TimeFrame, Report<ConfigError>> {
        TimeFrame::from_str(&self.market.interval).ok_or_else(|| {
            Report::new(ConfigError::Validation {
                field: format!("market.interval: unknown timeframe \"{}\"", self.market.interval),
            })
        })
    }
}

/// Market-data API credentials, read from the environment at startup.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    // Kline requests are unsigned; the secret is only needed by signed endpoints.
    #[allow(dead_code)]
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env(binance: &BinanceConfig) -> Result<Self, Report<ConfigError>> {
        Self::from_lookup(binance, |name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`; unset or blank values are errors.
    pub fn from_lookup(
        binance: &BinanceConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Report<ConfigError>> {
        let read = |name: &str| -> Result<String, Report<ConfigError>> {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    Report::new(ConfigError::MissingCredential {
                        variable: name.to_owned(),
                    })
                })
        };

        Ok(Self {
            api_key: read(&binance.api_key_env)?,
            api_secret: read(&binance.api_secret_env)?,
        })
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

/// Load `path` when given; otherwise load `config.toml` if it exists, falling
/// back to built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig, Report<ConfigError>> {
    match path {
        Some(path) => load(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load(Path::new(DEFAULT_CONFIG_PATH)),
        None => {
            let config = AppConfig::default();
            validate(&config)?;
            Ok(config)
        }
    }
}

const VALID_SOURCES: &[&str] = &["binance"];
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    config.bind_addr()?;
    validate_market(config)?;
    validate_analytics(config)?;
    validate_binance(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" must be one of {:?}",
                config.general.log_format, VALID_LOG_FORMATS
            ),
        }));
    }
    Ok(())
}

fn validate_market(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let market = &config.market;

    if !VALID_SOURCES.contains(&market.source.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("market.source \"{}\" is not supported", market.source),
        }));
    }

    if market.symbol.trim().is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "market.symbol must not be empty".into(),
        }));
    }

    config.timeframe()?;

    if market.limit == 0 || market.limit > MAX_CANDLE_LIMIT {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "market.limit {} must be between 1 and {MAX_CANDLE_LIMIT}",
                market.limit
            ),
        }));
    }
    Ok(())
}

fn validate_analytics(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.analytics.window == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "analytics.window must be > 0".into(),
        }));
    }
    Ok(())
}

fn validate_binance(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.binance.requests_per_second == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "binance.requests_per_second must be > 0".into(),
        }));
    }
    Ok(())
}
