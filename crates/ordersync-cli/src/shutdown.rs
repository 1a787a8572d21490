//! Process signal handling

use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// Cancel the returned token on Ctrl-C, or SIGTERM on unix.
pub fn install_signal_handler() -> Result<CancellationToken, CliError> {
    let token = CancellationToken::new();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        tokio::select! {
            result = tokio::signal::ctrl_c() => log_signal("SIGINT", result),
            _ = terminate.recv() => log_signal("SIGTERM", Ok(())),
        }
        #[cfg(not(unix))]
        log_signal("Ctrl-C", tokio::signal::ctrl_c().await);

        trigger.cancel();
    });

    Ok(token)
}

fn log_signal(name: &str, result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::info!(signal = name, "shutdown requested"),
        Err(error) => tracing::warn!(%error, "signal listener failed; shutting down"),
    }
}
