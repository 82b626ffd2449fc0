//! Termination signals that end a run early
//!
//! Both Ctrl+C and SIGTERM resolve the returned future. SIGTERM is what a
//! competing run sends when it takes the lock over, so the run record is
//! finalized and the lock released before the process exits.

use std::future::Future;
use tokio::signal;
use tracing::{error, info};

/// Future resolving on the first Ctrl+C or SIGTERM.
///
/// The SIGTERM handler is installed when this is called, not on first poll,
/// so a signal arriving before the run starts polling is not lost.
pub fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = signal::unix::signal(signal::unix::SignalKind::terminate());

    async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match terminate {
                Ok(mut stream) => {
                    stream.recv().await;
                },
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                },
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, stopping run");
            },
            _ = terminate => {
                info!("Received SIGTERM, stopping run");
            },
        }
    }
}
