//! `ensemble-gateway` -- the WebSocket bridge in front of the runtime.

mod proxy;
mod sse;
mod state;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;

use ens_domain::config::Config;
use state::GatewayState;

#[derive(Parser)]
#[command(name = "ensemble-gateway", about = "WebSocket gateway for the Ensemble runtime")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::load(&cli.config).context("loading config")?);
    let state = GatewayState::new(config.clone())?;

    let app = Router::new()
        .route("/ws/:session_id", get(ws::client_ws))
        .route("/agents", get(proxy::proxy_get))
        .route("/agents/:session_id/current", get(proxy::proxy_get))
        .route("/sessions", get(proxy::proxy_get))
        .route("/sessions/:id/history", get(proxy::proxy_get))
        .route("/sessions/:id/pending-approvals", get(proxy::proxy_get))
        .route("/events/metrics", get(proxy::proxy_get))
        .route("/events/metrics/session/:id", get(proxy::proxy_get))
        .route("/events/metrics/sessions", get(proxy::proxy_get))
        .route("/events/audit-log", get(proxy::proxy_get))
        .route("/events/stats", get(proxy::proxy_get))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, agent_url = %config.gateway.agent_url, "gateway listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
