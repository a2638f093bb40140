//! Process signal handling for the worker binary

use tokio_util::sync::CancellationToken;

use crate::Result;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The worker loop races it against the running routine, so an
/// in-flight trial is still reported before the process exits.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if a signal handler cannot be
/// registered.
#[cfg(unix)]
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::warn!("Received SIGTERM, stopping after the current trial is reported");
            }
            _ = sigint.recv() => {
                tracing::warn!("Received SIGINT, stopping after the current trial is reported");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}

/// Install a shutdown handler that listens for Ctrl-C.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl-C, stopping after the current trial is reported");
            token_clone.cancel();
        }
    });

    Ok(token)
}
