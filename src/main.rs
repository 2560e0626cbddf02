use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::response::Json;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use floodgate::config::FloodgateConfig;
use floodgate::http::RateLimitLayer;
use floodgate::ratelimit::RateLimiter;
use floodgate::store::RedisStore;

/// Standalone Floodgate server: the rate limiting middleware in front of a
/// stub upstream, for exercising policies against a real store.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Floodgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Connect to the shared store
    let store = RedisStore::connect(&config.store).await?;
    info!(url = %config.store.url, "Connected to shared store");

    // Initialize the rate limiter
    let limiter = Arc::new(RateLimiter::with_policies(
        Arc::new(store),
        config.rate_limiting.clone(),
    ));
    info!("Rate limiter initialized");

    let app = Router::new()
        .route("/health", get(health))
        .fallback(upstream)
        .layer(RateLimitLayer::new(limiter));

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!("Listening on {}", config.server.listen_addr);

    // Run the server with graceful shutdown on Ctrl+C
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Floodgate Rate Limiting Service stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn upstream() -> &'static str {
    "ok"
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
