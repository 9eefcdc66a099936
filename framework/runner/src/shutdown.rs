use anyhow::Context;
use netem_lab_core::prelude::{ShutdownHandle, ShutdownReason};
use tokio::signal;

/// Turn SIGINT and SIGTERM into shutdown requests on the returned handle.
///
/// Signals after the first are logged and otherwise ignored, so a second Ctrl-C cannot cut
/// teardown short.
pub fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<ShutdownHandle> {
    let handle = ShutdownHandle::new();

    let _guard = runtime.enter();
    let mut signals = Signals::new().context("Failed to install signal handlers")?;

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        let mut received = false;
        loop {
            let reason = match signals.recv().await {
                Ok(reason) => reason,
                Err(e) => {
                    log::error!("Stopped listening for shutdown signals: {e}");
                    return;
                }
            };
            if received {
                log::warn!("Received {reason} while already shutting down, ignoring");
                continue;
            }
            received = true;
            log::warn!("Received {reason}, shutting down...");
            listener_handle.shutdown(reason);
        }
    });

    Ok(handle)
}

struct Signals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<ShutdownReason> {
        tokio::select! {
            result = signal::ctrl_c() => result.map(|()| ShutdownReason::Interrupt),
            _ = self.terminate.recv() => Ok(ShutdownReason::Terminate),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<ShutdownReason> {
        signal::ctrl_c().await.map(|()| ShutdownReason::Interrupt)
    }
}
