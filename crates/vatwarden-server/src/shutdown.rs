use std::sync::Arc;

use tracing::{error, info};

use vatwarden_core::{Admin, ExitReason, Terminator};

/// Exits the process.
pub struct ProcessTerminator;

pub fn exit_code(reason: ExitReason) -> i32 {
    match reason {
        ExitReason::TimeoutExpired | ExitReason::StopRequested => 0,
        ExitReason::Signal => 130,
    }
}

impl Terminator for ProcessTerminator {
    fn terminate(&self, reason: ExitReason) {
        info!(?reason, "exiting");
        std::process::exit(exit_code(reason));
    }
}

/// Resolves on the next SIGINT or SIGTERM.
pub async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await?;

    Ok(())
}

/// First signal starts the admin's graceful stop, a second one exits
/// immediately.
pub async fn watch_signals(admin: Arc<Admin>) {
    if let Err(err) = shutdown_signal().await {
        error!(error = %err, "failed to install signal handler");
        return;
    }
    info!("signal received, starting graceful shutdown");
    admin.stop();

    if shutdown_signal().await.is_ok() {
        admin.terminate_now(ExitReason::Signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_signals_exit_non_zero() {
        assert_eq!(exit_code(ExitReason::TimeoutExpired), 0);
        assert_eq!(exit_code(ExitReason::StopRequested), 0);
        assert_eq!(exit_code(ExitReason::Signal), 130);
    }
}
