use std::{fmt, sync::Arc};

use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};
use tokio::sync::Mutex;

/// Why a run is being asked to stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT, usually Ctrl-C from the operator.
    Interrupt,
    /// SIGTERM from a process manager.
    Terminate,
    /// Requested from code, for example a test harness.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<ShutdownReason>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(4).0,
        }
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Err(e) = self.sender.send(reason) {
            // Nobody is subscribed yet, or the run already finished.
            log::warn!("Failed to send shutdown signal: {e:?}");
        }
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Arc<Mutex<Receiver<ShutdownReason>>>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<ShutdownReason>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Wait until a shutdown is requested and return the reason.
    ///
    /// Safe to race against other futures in a `tokio::select!`. If every [ShutdownHandle] has been
    /// dropped then no shutdown can ever arrive and this future never completes.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok(reason) => return reason,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("{msg}: {reason}")]
pub struct ShutdownSignalError {
    msg: String,
    reason: ShutdownReason,
}

impl ShutdownSignalError {
    pub fn new(reason: ShutdownReason) -> Self {
        Self {
            msg: "Run cancelled by shutdown signal".to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn listener_receives_reason() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        handle.shutdown(ShutdownReason::Terminate);

        assert_eq!(ShutdownReason::Terminate, listener.wait_for_shutdown().await);
    }

    #[tokio::test]
    async fn nothing_is_received_until_signalled() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        assert!(timeout(Duration::from_millis(50), listener.wait_for_shutdown())
            .await
            .is_err());

        handle.shutdown(ShutdownReason::Requested);
        assert_eq!(ShutdownReason::Requested, listener.wait_for_shutdown().await);
    }

    #[tokio::test]
    async fn listener_created_after_signal_does_not_see_it() {
        let handle = ShutdownHandle::new();
        let _early = handle.new_listener();
        handle.shutdown(ShutdownReason::Interrupt);

        let mut late = handle.new_listener();
        assert!(timeout(Duration::from_millis(50), late.wait_for_shutdown())
            .await
            .is_err());
    }

    #[test]
    fn error_display_includes_reason() {
        let err = ShutdownSignalError::new(ShutdownReason::Interrupt);
        assert_eq!("Run cancelled by shutdown signal: SIGINT", err.to_string());
    }
}
