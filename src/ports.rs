use crate::error::{Result, SwarmError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Cooperative cancellation shared between a build worker and its
/// controllers. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// # Errors
    /// Returns `Cancelled` if the flag is already set.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(SwarmError::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// # Errors
    /// Returns `Cancelled` when the flag is set before the sleep elapses.
    pub async fn sleep(&self, duration: Duration, what: &str) -> Result<()> {
        self.check(what)?;
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.cancelled() => Err(SwarmError::Cancelled(what.to_string())),
        }
    }

    /// Runs `future` unless cancelled first.
    ///
    /// # Errors
    /// Returns `Cancelled` or the future's own error.
    pub async fn guard<T>(&self, what: &str, future: impl Future<Output = Result<T>>) -> Result<T> {
        self.check(what)?;
        tokio::select! {
            result = future => result,
            () = self.cancelled() => Err(SwarmError::Cancelled(what.to_string())),
        }
    }
}
