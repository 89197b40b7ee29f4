//! Graceful shutdown utilities

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl+C, or SIGTERM on Unix
///
/// Docker stops containers with SIGTERM, so both must end the service.
pub async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = interrupt => info!("Interrupt received"),
        () = terminate() => info!("SIGTERM received"),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        },
        Err(e) => {
            warn!("SIGTERM handler unavailable, only Ctrl+C stops the service: {}", e);
            std::future::pending::<()>().await;
        },
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Cancel `token` when a shutdown signal arrives
///
/// Returns immediately; the listener ends on its own if the token is
/// cancelled by someone else first.
pub fn spawn_shutdown_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_shutdown() => token.cancel(),
            () = token.cancelled() => {},
        }
    })
}

/// Wait for the listener task, logging a panic or abort instead of dropping it
pub async fn join_shutdown_listener(listener: JoinHandle<()>) {
    if let Err(e) = listener.await {
        warn!("Shutdown listener failed: {}", e);
    }
}
