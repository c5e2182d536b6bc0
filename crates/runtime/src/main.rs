//! `ensemble-runtime` -- the multi-agent orchestration runtime server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ens_domain::config::Config;
use ens_runtime::{api, bootstrap};

#[derive(Parser)]
#[command(name = "ensemble-runtime", about = "Multi-agent orchestration runtime")]
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

    let state = bootstrap::build_app_state(config.clone(), None)?;
    bootstrap::spawn_background_tasks(&state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "runtime listening");

    axum::serve(listener, api::build_router(state))
        .await
        .context("server error")?;
    Ok(())
}
