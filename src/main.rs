//! relay-engine server entry point.
//!
//! Starts the tokio host with the demo application: `GET /health`,
//! `POST /publish` and JSON pub/sub commands on `GET /ws`.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use relay_engine::config::{EngineConfig, LogFormat};
use relay_engine::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = EngineConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(
        addr = %config.listen_addr,
        max_head = config.http.max_head_size,
        max_body = config.http.max_body_size,
        ws_max_message = config.ws.max_message_size,
        "starting relay-engine"
    );

    // Build hub and application state
    let state = server::build_state(&config);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    tokio::select! {
        () = server::serve(listener, state) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            tracing::info!("shutting down");
        }
    }

    Ok(())
}
