//! Driver interface the executor dispatches SQL to

pub mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

use crate::normalize::{ColumnDescriptor, RawRows};
use crate::query::Database;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Could not connect to database: {0}")]
    Connection(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Execution(String),

    #[error("Query was cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag shared between the executor and a backend
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Receives `(percent, rows_so_far)` updates from a running backend call
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<dyn Fn(u8, usize) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(u8, usize) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, percent: u8, rows: usize) {
        (self.callback)(percent.min(100), rows);
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressReporter")
    }
}

#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub database: Arc<Database>,
    pub sql: String,
    /// Handle the backend can later be asked to cancel by
    pub tracking_handle: String,
    pub cancel: CancelSignal,
}

/// Driver output before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: RawRows,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, request: BackendRequest, progress: ProgressReporter) -> Result<RawResultSet, BackendError>;

    /// Best-effort cancellation of the call registered under `tracking_handle`
    async fn cancel(&self, tracking_handle: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_progress_clamps_percent() {
        let seen = Arc::new(AtomicUsize::new(0));
        let reporter = {
            let seen = Arc::clone(&seen);
            ProgressReporter::new(move |percent, _| seen.store(percent as usize, Ordering::SeqCst))
        };
        reporter.report(250, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
