//! Cancellation and deadline scope for database operations.
//!
//! Every contract operation takes a [`Context`]. Operations race against the
//! context's deadline and cancel signal and stop waiting as soon as either
//! fires. Dropping the operation future is the other way to cancel.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation carried into each database call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] derived from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that never expires and is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().deadline(deadline)
    }

    /// Derive a context with a tighter deadline. An earlier existing deadline wins.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a cancellable context.
    ///
    /// Replaces any cancel signal already attached to `self`.
    pub fn with_cancel(self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: self.deadline,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Check the context before starting work.
    pub fn check(&self, operation: &str) -> DbResult<()> {
        if self.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        if self.is_expired() {
            return Err(DbError::timeout(operation, Duration::ZERO));
        }
        Ok(())
    }

    /// Run `fut` under this context.
    ///
    /// Driver errors are converted into [`DbError`]; deadline expiry becomes
    /// [`DbError::Timeout`] and cancellation [`DbError::Cancelled`].
    pub async fn run<T, E, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<DbError>,
    {
        self.check(operation)?;

        let started = Instant::now();
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled(self.cancel.clone()) => Err(DbError::cancelled(operation)),
            _ = expired => Err(DbError::timeout(operation, started.elapsed())),
            result = fut => result.map_err(Into::into),
        }
    }
}

/// Resolves once the cancel flag flips. A dropped handle never cancels.
async fn cancelled(rx: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = rx {
        let fired = rx.wait_for(|flag| *flag).await.is_ok();
        if fired {
            return;
        }
    }
    std::future::pending::<()>().await
}
