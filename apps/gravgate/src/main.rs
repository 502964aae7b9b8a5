use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use gravgate_common::{GatewayConfig, GatewayConfigPatch};
use gravgate_core::keys::KeyStore;
use gravgate_core::upstream::{UpstreamClientConfig, WreqUpstreamClient};
use gravgate_core::GatewayState;
use gravgate_pool::{CredentialPool, IdentityCache, WreqTokenRefresher};
use gravgate_storage::data_dir::resolve_data_dir;
use gravgate_storage::{DataDir, JsonFile, LogBuffer};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gravgate=info,warn")),
        )
        .init();

    let args = cli::Cli::parse();
    let data_dir = DataDir::ensure(resolve_data_dir(&args.data_dir))
        .await
        .context("failed to create the data directory")?;

    let config = load_config(&data_dir, &args).await?;

    let refresher = Arc::new(
        WreqTokenRefresher::new(
            config.api.host.clone(),
            config.oauth.client_id.clone(),
            config.oauth.client_secret.clone(),
        )
        .context("failed to build the token refresher")?,
    );
    let pool = CredentialPool::load(JsonFile::new(data_dir.accounts()), refresher)
        .await
        .context("failed to load accounts.json")?;
    let keys = Arc::new(
        KeyStore::load(JsonFile::new(data_dir.api_keys()))
            .await
            .context("failed to load api_keys.json")?,
    );
    let logs = LogBuffer::new(JsonFile::new(data_dir.app_logs()));
    let upstream = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig::default())
            .context("failed to build the upstream client")?,
    );

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let state = GatewayState::new(
        config,
        pool,
        keys.clone(),
        IdentityCache::new(),
        upstream,
        logs.clone(),
    );

    // Background flush loops; started exactly once, stopped on shutdown.
    let keys_flush = keys.spawn_flush_task();
    let logs_flush = logs.spawn_flush_task();

    let app = gravgate_router::gateway_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(event = "boot", address = %bind, "gateway listening");
    logs.append("info", format!("gateway listening on {bind}")).await;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    keys_flush.abort();
    logs_flush.abort();
    let _ = keys.flush().await;
    logs.flush().await;
    info!(event = "shutdown", "gateway stopped");
    Ok(())
}

async fn load_config(data_dir: &DataDir, args: &cli::Cli) -> Result<GatewayConfig> {
    let file: JsonFile<GatewayConfig> = JsonFile::new(data_dir.config());
    let seeded = tokio::fs::try_exists(data_dir.config()).await.unwrap_or(false);
    let mut config = file.load().await.context("failed to load config.json")?;

    let mut patch = GatewayConfigPatch::from_env();
    patch.overlay(GatewayConfigPatch {
        host: (!args.host.is_empty()).then(|| args.host.clone()),
        port: args.port,
        ..Default::default()
    });
    patch.apply(&mut config);

    if !seeded {
        file.write(&config)
            .await
            .context("failed to seed config.json")?;
    }
    Ok(config)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
