//! Switchboard Probe binary.
//!
//! Entry point for the probe that acquires a session and issues one request.

use anyhow::Context;
use switchboard_probe::ProbeConfig;
use switchboard_sdk::{AcquireOptions, SessionManager, WsConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchboard_sdk=debug,switchboard_probe=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProbeConfig::from_env().context("invalid probe configuration")?;

    tracing::info!("Starting Switchboard probe");
    tracing::info!("Discovery URL: {}", config.discovery_url);
    if let Some(host) = &config.host {
        tracing::info!("Host override: {}", host);
    }

    let manager = SessionManager::over_http(
        config.discovery_config(),
        config.session_config()?,
        WsConfig::default(),
    )?;

    let mut notices = manager.notices();
    let printer = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => eprintln!("notice: {}", notice),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "notices dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let Some(session) = manager
        .instance(AcquireOptions::default())
        .await
        .context("failed to acquire session")?
    else {
        anyhow::bail!("backend has no capacity left, try again later");
    };

    tracing::info!(
        endpoint = %session.endpoint(),
        identity = ?session.identity().await,
        "Session active"
    );

    let reply = session
        .post(&config.event, config.payload.clone())
        .await
        .with_context(|| format!("request {} failed", config.event))?;
    tracing::info!(event = %config.event, "Response received");
    println!("{}", serde_json::to_string_pretty(&reply)?);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down probe");

    manager.shutdown().await;
    printer.abort();

    Ok(())
}
