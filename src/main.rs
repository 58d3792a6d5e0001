mod analytics;
mod config;
mod error;
mod exchange;
mod model;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, Credentials};
use exchange::MarketDataSource;
use exchange::binance::BinanceExchange;
use server::{AppState, MarketDefaults};

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("server error")]
    Server,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(
    name = "anchor-levels",
    about = "Serves candles with support/resistance and anchored VWAP"
)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ./config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();

    // A missing .env file is fine; the variables may come from the shell.
    let dotenv = dotenvy::dotenv();

    let config = config::load_or_default(cli.config.as_deref()).change_context(AppError::Config)?;

    init_tracing(&config);
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to read .env file"),
    }

    // ── Market data source ────────────────────────────────────────────────────
    let source = build_source(&config).change_context(AppError::Config)?;
    let defaults = MarketDefaults::from_config(&config).change_context(AppError::Config)?;

    info!(
        source = source.name(),
        symbol = %defaults.symbol,
        timeframe = %defaults.timeframe,
        limit = defaults.limit,
        window = defaults.window,
        "market defaults"
    );

    // ── HTTP server ───────────────────────────────────────────────────────────
    let addr = config.bind_addr().change_context(AppError::Config)?;
    let listener = TcpListener::bind(addr)
        .await
        .change_context(AppError::Server)
        .attach_with(|| format!("bind: {addr}"))?;

    let router = server::create_router(AppState::new(source, defaults));
    let cancel = CancellationToken::new();
    let mut server_handle = tokio::spawn(server::serve(listener, router, cancel.clone()));

    info!(%addr, "listening");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.change_context(AppError::Runtime)?;
            info!("ctrl+c received, shutting down");
        }
        result = &mut server_handle => {
            return result
                .change_context(AppError::Runtime)?
                .change_context(AppError::Server);
        }
    }

    cancel.cancel();
    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(result) => result
            .change_context(AppError::Runtime)?
            .change_context(AppError::Server)?,
        Err(_) => warn!("server did not stop within 5s"),
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_source(config: &AppConfig) -> Result<Arc<dyn MarketDataSource>, Report<error::ConfigError>> {
    match config.market.source.as_str() {
        "binance" => {
            let credentials = Credentials::from_env(&config.binance)?;
            Ok(Arc::new(BinanceExchange::new(&config.binance, credentials)?))
        }
        other => Err(Report::new(error::ConfigError::Validation {
            field: format!("market.source: unknown source \"{other}\""),
        })),
    }
}
