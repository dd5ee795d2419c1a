// src/shutdown.rs

use std::io;

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Install a handler for SIGTERM, SIGINT, SIGQUIT and SIGUSR1.
///
/// The first signal cancels the returned token; the execution loop observes
/// it at its check points and runs its stop sequence. Later signals are
/// absorbed and logged so they cannot interrupt the cleanup.
pub fn install_shutdown_handler() -> io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = sigquit.recv() => "SIGQUIT",
                _ = sigusr1.recv() => "SIGUSR1",
            };

            if token_clone.is_cancelled() {
                warn!(signal = name, "stop already in progress; ignoring signal");
            } else {
                info!(signal = name, "received signal, initiating graceful shutdown");
                token_clone.cancel();
            }
        }
    });

    Ok(token)
}
