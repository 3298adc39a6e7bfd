// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation
//!
//! One router, served on TCP and (on Unix) on a local socket. Shutdown closes
//! the channel hub first so open event streams and long polls finish, then
//! lets both listeners drain.

use anyhow::{Context, Result};
use axum::Router;
use std::future::{Future, IntoFuture};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use berth_core::application::{open_repositories, Coordinator};
use berth_core::domain::clock::SystemClock;
use berth_core::domain::config::DaemonConfig;
use berth_core::presentation::api::app;

#[cfg(unix)]
use tokio::net::UnixListener;

pub async fn start_daemon(config: DaemonConfig) -> Result<()> {
    info!("berth daemon starting (PID: {})", std::process::id());
    run_until(config, shutdown_signal()).await
}

/// Serve until `shutdown` resolves.
pub async fn run_until<F>(config: DaemonConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config
        .validate()
        .context("Configuration validation failed")?;

    let (repos, database) = open_repositories(&config.storage_backend())
        .await
        .context("Failed to open coordination store")?;

    let coordinator = Coordinator::new(&config, repos, Arc::new(SystemClock))
        .context("Failed to initialize coordinator")?;

    let addr = format!("{}:{}", config.network.bind_address, config.network.port);
    let tcp = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Daemon listening on {}", tcp.local_addr().context("TCP listener has no address")?);

    #[cfg(unix)]
    let unix = match &config.network.socket_path {
        Some(path) => {
            let listener = bind_unix_socket(path).await?;
            info!("Daemon listening on unix:{}", path.display());
            Some(listener)
        }
        None => None,
    };
    #[cfg(not(unix))]
    if config.network.socket_path.is_some() {
        warn!("Unix sockets are unavailable on this platform; serving TCP only");
    }

    let sweeper = coordinator.sweeper.clone().start();
    let router = app(coordinator.clone());

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("Daemon shutting down");
            coordinator.shutdown();
            stop.cancel();
        });
    }

    let tcp_server = axum::serve(tcp, router.clone())
        .with_graceful_shutdown(stop.clone().cancelled_owned())
        .into_future();

    #[cfg(unix)]
    let served = tokio::try_join!(tcp_server, serve_unix(unix, router, stop.clone()));
    #[cfg(not(unix))]
    let served = tcp_server.await.map(|()| ((), ()));

    // A failed listener must not leave the other one running.
    coordinator.shutdown();
    stop.cancel();

    if let Err(e) = sweeper.await {
        warn!("Expiry sweeper task ended abnormally: {}", e);
    }

    #[cfg(unix)]
    if let Some(path) = &config.network.socket_path {
        remove_socket_file(path);
    }

    if let Some(db) = database {
        db.close().await;
    }

    match served {
        Ok(_) => {
            info!("Daemon stopped");
            Ok(())
        }
        Err(e) => {
            error!("HTTP server failed: {}", e);
            Err(e).context("HTTP server failed")
        }
    }
}

#[cfg(unix)]
async fn serve_unix(
    listener: Option<UnixListener>,
    router: Router,
    stop: CancellationToken,
) -> std::io::Result<()> {
    match listener {
        Some(listener) => {
            axum::serve(listener, router)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
        None => Ok(()),
    }
}

/// Bind the Unix listener, replacing a socket file left behind by a daemon
/// that did not shut down cleanly. A socket that still accepts connections
/// belongs to a live daemon and is left alone.
#[cfg(unix)]
pub async fn bind_unix_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory {:?}", parent))?;
        }
    }

    if path.exists() {
        if tokio::net::UnixStream::connect(path).await.is_ok() {
            anyhow::bail!("Another daemon is already listening on {}", path.display());
        }
        warn!("Removing stale socket file {}", path.display());
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {:?}", path))?;
    }

    UnixListener::bind(path).with_context(|| format!("Failed to bind unix socket {:?}", path))
}

#[cfg(unix)]
fn remove_socket_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove socket {}: {}", path.display(), e);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use berth_core::domain::config::StorageKind;
    use std::path::PathBuf;

    fn memory_config(socket: PathBuf) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.network.port = 0;
        config.network.socket_path = Some(socket);
        config.storage.backend = StorageKind::Memory;
        config
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.sock");
        std::fs::write(&path, b"").unwrap();

        let listener = bind_unix_socket(&path).await;
        assert!(listener.is_ok());
    }

    #[tokio::test]
    async fn test_live_socket_is_not_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("berth.sock");

        let _live = bind_unix_socket(&path).await.unwrap();
        let second = bind_unix_socket(&path).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_daemon_stops_on_shutdown_and_cleans_up_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("berth.sock");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let daemon = tokio::spawn(run_until(memory_config(socket.clone()), async move {
            let _ = rx.await;
        }));

        while !socket.exists() && !daemon.is_finished() {
            tokio::task::yield_now().await;
        }
        tx.send(()).unwrap();

        tokio_test::assert_ok!(daemon.await.unwrap());
        assert!(!socket.exists());
    }
}
