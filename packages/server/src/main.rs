//! Budget generation pipeline process.
//!
//! Connects to SurrealDB, starts the worker pool and runs until SIGINT or
//! SIGTERM. Configuration comes from the environment, with `.env` loaded
//! first when present.

use std::sync::Arc;

use actors::{
    AreaBasedEstimator, PipelineDeps, PoolConfig, RealtimeHub, SmtpConfig, SmtpMailer, WorkerPool,
    format_sse_event,
};
use db::DbConfig;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_config = DbConfig::from_env();
    tracing::info!(
        endpoint = %db_config.endpoint,
        namespace = %db_config.namespace,
        database = %db_config.database,
        "Connecting to SurrealDB"
    );
    let database = db::init(&db_config).await?;

    let hub = RealtimeHub::default();
    let realtime_log = spawn_realtime_log(&hub);

    let estimator = Arc::new(AreaBasedEstimator);
    let mut deps = PipelineDeps::from_database(&database, estimator.clone(), estimator, Arc::new(hub));

    match SmtpConfig::from_env()? {
        Some(smtp) => deps = deps.with_email(Arc::new(SmtpMailer::new(&smtp)?)),
        None => tracing::info!("SMTP_HOST not set; email delivery disabled"),
    }

    let config = PoolConfig::from_env()?;
    let (pool, handle) = WorkerPool::spawn(deps, config.clone()).await?;
    pool.start(config.start_options()).await?;
    tracing::info!(
        budget_workers = config.budget_worker_count,
        notifications = config.enable_notifications,
        "Budget pipeline running"
    );

    shutdown_signal().await?;

    tracing::info!("Stopping worker pool");
    pool.shutdown().await?;
    handle.await?;
    realtime_log.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Mirror real-time events to the log until the hub closes.
fn spawn_realtime_log(hub: &RealtimeHub) -> JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => tracing::debug!(
                    channel = %envelope.channel,
                    event = %format_sse_event(&envelope),
                    "Real-time event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Real-time log lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
