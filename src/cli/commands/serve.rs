//! `maestro serve`: run the coordinator and HTTP API in this process.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::adapters::http::HttpServer;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::{build_runtime, logging};

/// Arguments for `maestro serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Load this YAML file instead of .maestro/config.yaml and overrides
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Load config, recover interrupted workflows and serve until Ctrl-C.
pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _log_guard = logging::init(&config.logging)?;

    let runtime = build_runtime(&config).await?;
    let coordinator = runtime.coordinator;

    let report = coordinator.recover().await.context("Crash recovery failed")?;
    if !report.resumed.is_empty() || !report.failed.is_empty() {
        tracing::info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "recovered interrupted workflows"
        );
    }

    let listener = HttpServer::bind(&config.server)
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;
    HttpServer::new(coordinator.clone(), &config.server)
        .serve(listener, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    coordinator.shutdown().await;
    runtime.pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
