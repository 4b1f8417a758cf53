use std::future::Future;
use std::io;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

/// Flip a watch channel to `true` on Ctrl+C or SIGTERM.
///
/// Handlers are installed before this returns, so a signal arriving while
/// the session is still bootstrapping is not lost.
pub fn listen_for_shutdown() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = terminate.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        first_signal(tokio::signal::ctrl_c(), terminate).await;
        let _ = tx.send(true);
    });

    Ok(rx)
}

/// Resolve once either signal arrives. If the Ctrl+C listener fails,
/// SIGTERM is the only remaining trigger.
async fn first_signal<C, T>(ctrl_c: C, terminate: T)
where
    C: Future<Output = io::Result<()>>,
    T: Future,
{
    let ctrl_c = async {
        match ctrl_c.await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => info!("Received SIGTERM"),
    }
}
