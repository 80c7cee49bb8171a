//! Graceful shutdown signal, shared by every service's `main`.

use tokio::signal as tokio_signal;

/// Resolves when SIGTERM or SIGINT (Ctrl+C) is received.
pub async fn signal() {
    let ctrl_c = async {
        tokio_signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio_signal::unix::signal(tokio_signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
