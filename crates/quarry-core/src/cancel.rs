//! Cooperative cancellation for I/O-bound projection work.
//!
//! A [`CancelHandle`] is held by the caller; any number of [`CancelSignal`]
//! clones are passed down to catalog queries, generators and storage writes,
//! which check the signal at each boundary.
//!
//! # Example
//!
//! ```rust
//! use quarry_core::cancel::CancelHandle;
//!
//! let handle = CancelHandle::new();
//! let signal = handle.signal();
//! assert!(!signal.is_cancelled());
//!
//! handle.cancel();
//! assert!(signal.is_cancelled());
//! assert!(signal.check("upload").is_err());
//! ```

use std::fmt;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Owner side of a cancellation channel.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Creates a new, un-cancelled handle.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a signal observing this handle.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation channel.
#[derive(Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Returns `Error::Cancelled` naming `operation` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the signal has fired.
    pub fn check(&self, operation: impl fmt::Display) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled(operation));
        }
        Ok(())
    }

    /// Resolves once cancellation is requested.
    ///
    /// Never resolves for [`CancelSignal::never`] or when the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn never_is_never_cancelled() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        assert!(signal.check("anything").is_ok());
    }

    #[test]
    fn clones_observe_the_same_handle() {
        let handle = CancelHandle::new();
        let a = handle.signal();
        let b = a.clone();
        handle.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(matches!(b.check("write"), Err(Error::Cancelled { .. })));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let handle = CancelHandle::new();
        let signal = handle.signal();

        let waiter = tokio::spawn(async move { signal.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("should resolve")
            .expect("task should not panic");
    }
}
