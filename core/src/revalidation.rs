//! Single-flight revalidation lock.
//!
//! At most one revalidation operation runs per lock at a time. Callers that
//! find an operation in flight are turned away rather than queued, and
//! nobody waits on the operation itself.
//!
//! Without a timeout, an operation that never settles keeps the lock held
//! and suppresses revalidation until the process restarts.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error};

/// State shared between the lock and its running operation.
#[derive(Debug, Default)]
struct Shared {
    /// Whether an operation is currently running. Checked and set under
    /// the mutex as one step, even on a multi-threaded runtime.
    in_flight: Mutex<bool>,
    /// Woken when the running operation ends.
    released: Notify,
}

/// Clears the in-flight mark when the spawned operation ends, including
/// on panic or task cancellation.
struct ReleaseGuard {
    shared: Arc<Shared>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        *self.shared.in_flight.lock() = false;
        self.shared.released.notify_waiters();
    }
}

/// Guards a refresh so only one is in flight at a time.
#[derive(Debug, Clone, Default)]
pub struct RevalidationLock {
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl RevalidationLock {
    /// Create an idle lock with no operation timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an idle lock that abandons operations running longer than
    /// `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            timeout,
        }
    }

    /// Start `operation` in the background unless one is already in flight.
    ///
    /// Returns immediately. Returns `true` if this call started the
    /// operation, `false` if the call was a no-op. Failures of the operation
    /// are logged and never reach the caller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_revalidation<F, Fut, E>(&self, operation: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        {
            let mut in_flight = self.shared.in_flight.lock();
            if *in_flight {
                debug!("Revalidation already in flight, skipping");
                return false;
            }
            *in_flight = true;
        }

        let guard = ReleaseGuard {
            shared: Arc::clone(&self.shared),
        };
        let timeout = self.timeout;

        tokio::spawn(async move {
            let _guard = guard;

            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
                },
                None => operation().await.map_err(|e| e.to_string()),
            };

            match outcome {
                Ok(()) => debug!("Background revalidation completed"),
                Err(e) => error!(error = %e, "Background revalidation failed"),
            }
        });

        true
    }

    /// Whether an operation is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        *self.shared.in_flight.lock()
    }

    /// Wait for the operation in flight when called, if any, to settle.
    /// Any number of callers may wait at once.
    pub async fn settled(&self) {
        let released = self.shared.released.notified();
        if self.is_in_flight() {
            released.await;
        }
    }
}
