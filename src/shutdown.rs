use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Cancel the returned token on the first SIGINT or SIGTERM.
///
/// The CLI watches this token and stops every running experiment through
/// the lifecycle manager, so held units are released before exit.
pub fn install_interrupt_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, stopping experiments"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, stopping experiments"),
            _ = trigger.cancelled() => return,
        }
        trigger.cancel();
    });

    Ok(token)
}
