use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use usage_ledger::{api, ApiState, LedgerConfig, LedgerManager, LedgerStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = LedgerConfig::from_env()?;
    let host = config.server_host.clone();
    let port = config.server_port;

    info!(
        host = %host,
        port,
        data_dir = %config.data_dir.display(),
        "starting usage-ledger service"
    );

    let store = Arc::new(LedgerStore::new(config.data_dir.clone())?);
    let ledger = LedgerManager::new(Arc::clone(&store), &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_task = ledger.spawn_flush_task(shutdown_rx.clone());
    let reset_task = ledger.spawn_reset_task(shutdown_rx);

    let state = Arc::new(ApiState::new(ledger, config));
    let router = api::create_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("usage-ledger service shutting down");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(flush_task, reset_task);
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().map_err(|err| {
        anyhow::anyhow!("failed to install tracing subscriber: {err}")
    })?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
