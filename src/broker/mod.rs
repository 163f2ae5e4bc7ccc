//! Chat daemon: rooms, long-poll fan-out, presence.
//!
//! Listens on a Unix domain socket. Every connection gets its own task
//! holding an `Arc` of the shared [`state::BrokerState`]; there is no
//! central loop, so a request blocked on one room's signal never delays
//! another connection or another room.

mod connection;
mod handler;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};

use crate::pipeline::MessageHandler;
use crate::store::MessageStore;
use state::BrokerState;

/// Broker startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("$XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    #[error("broker already running at {0}")]
    AlreadyRunning(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    MkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to load rooms: {0}")]
    Provision(#[from] crate::room::ChatError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the daemon until SIGTERM or SIGINT.
///
/// Rooms already in the store are provisioned before the socket is
/// bound. On shutdown every blocked long-poll is released and the
/// socket file removed.
pub async fn run<H: MessageHandler, S: MessageStore>(
    state: BrokerState<H, S>,
) -> Result<(), BrokerError> {
    let socket_path = match &state.config().socket_path {
        Some(path) => path.clone(),
        None => resolve_socket_path()?,
    };

    let rooms = state.provision_all().await?;
    tracing::info!(rooms, handler = ?state.config().handler, "rooms provisioned");

    let listener = bind_socket(&socket_path).await?;
    tracing::info!(path = %socket_path.display(), "broker listening");

    let state = Arc::new(state);
    let mut next_conn: u64 = 1;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        tracing::debug!(conn_id = next_conn, "accepted connection");
                        connection::spawn_connection(stream, next_conn, Arc::clone(&state));
                        next_conn += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    // Blocked readers answer with whatever they have.
    state.close_all();

    drop(listener);
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, path = %socket_path.display(), "failed to remove socket");
    }

    tracing::info!("broker stopped");
    Ok(())
}

// -- Socket setup --

/// Default socket path under `$XDG_RUNTIME_DIR`.
pub fn resolve_socket_path() -> Result<PathBuf, BrokerError> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").map_err(|_| BrokerError::NoRuntimeDir)?;
    Ok(PathBuf::from(runtime_dir)
        .join("chatroomd")
        .join("broker.sock"))
}

/// Create the socket directory and bind the Unix listener.
///
/// Handles stale socket detection: if EADDRINUSE, attempts to connect
/// to the existing socket. If the connection succeeds, another broker
/// is running. If it fails, the socket is stale and is removed.
async fn bind_socket(path: &Path) -> Result<UnixListener, BrokerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| BrokerError::MkdirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).map_err(
                |e| BrokerError::MkdirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                },
            )?;
        }
    }

    let bind_failed = |source| BrokerError::BindFailed {
        path: path.to_path_buf(),
        source,
    };

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(BrokerError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(bind_failed)?;
            UnixListener::bind(path).map_err(bind_failed)
        }
        Err(e) => Err(bind_failed(e)),
    }
}
