mod cache;
mod cache_manager;
mod config;
mod error;
mod local;
mod mdns;
mod seed;
mod session;
mod sink;

use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::session::MembershipSession;
use crate::sink::ReportingSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries membership changes
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cluster_discoveryd=info"))
        )
        .init();

    tracing::info!("Starting cluster-discoveryd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/cluster-discovery/discoveryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let (reporting, reports) = ReportingSink::new();
    let writer = tokio::task::spawn_blocking(move || sink::write_reports(reports, std::io::stdout()));

    let session = MembershipSession::start(&config, Arc::new(reporting))
        .await
        .context("Failed to start membership session")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received, {} live member(s)", session.members().len());

    session.shutdown().await;

    // every sink handle is gone once the session is, which ends the writer
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        tracing::warn!("Membership report writer did not drain in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
