//! C8 — the supervisor: binds the public and internal listeners, wires the
//! axum `Router`s to them, and handles process lifecycle (SIGINT/SIGTERM
//! graceful shutdown, SIGHUP forcing an immediate reload, and a PID file
//! removed on exit).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::http::AppState;
use crate::reload::ReloadController;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("binding {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("writing pid file {path:?}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Removes its pid file on drop, so a crash or a clean shutdown both leave
/// the filesystem in the same state.
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub async fn create(path: PathBuf) -> Result<Self, SupervisorError> {
        fs_err::tokio::write(&path, std::process::id().to_string())
            .await
            .map_err(|source| SupervisorError::PidFile {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = fs_err::remove_file(&self.path);
    }
}

pub struct Supervisor {
    pub public_addr: SocketAddr,
    pub internal_addr: SocketAddr,
    pub reload: Arc<ReloadController>,
    pub pid_file: Option<PathBuf>,
}

impl Supervisor {
    /// Binds both listeners up front (fail fast on a bad `--addr` before
    /// doing anything else) and runs until a termination signal arrives.
    pub async fn run(self, state: AppState) -> Result<(), SupervisorError> {
        let public_listener = TcpListener::bind(self.public_addr)
            .await
            .map_err(|source| SupervisorError::Bind {
                addr: self.public_addr,
                source,
            })?;
        let internal_listener = TcpListener::bind(self.internal_addr)
            .await
            .map_err(|source| SupervisorError::Bind {
                addr: self.internal_addr,
                source,
            })?;

        let _pid_guard = match self.pid_file {
            Some(path) => Some(PidFileGuard::create(path).await?),
            None => None,
        };

        info!(addr = %self.public_addr, "public listener bound");
        info!(addr = %self.internal_addr, "internal listener bound");

        let public_router = crate::http::build_router(state.clone());
        let internal_router = crate::http::build_router(state);

        let reload = self.reload.clone();
        tokio::spawn(async move {
            wait_for_hup(reload).await;
        });

        let shutdown = shutdown_signal();
        tokio::select! {
            result = axum::serve(public_listener, public_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "public listener exited");
                }
            }
            result = axum::serve(internal_listener, internal_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "internal listener exited");
                }
            }
            _ = shutdown => {
                info!("shutdown signal received, draining connections");
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_hup(reload: Arc<ReloadController>) {
    use tokio::signal::unix::{signal, SignalKind};
    let Ok(mut hup) = signal(SignalKind::hangup()) else {
        return;
    };
    loop {
        hup.recv().await;
        info!("SIGHUP received, forcing config reload");
        if let Err(e) = reload.reload_now().await {
            tracing::error!(error = %e, "SIGHUP-triggered reload failed");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_hup(_reload: Arc<ReloadController>) {
    std::future::pending::<()>().await;
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
