//! Detached background work.
//!
//! Persistence writes and notifications happen after the admission decision
//! and must never hold up or fail the event pipeline. They are spawned here,
//! and their failures end up in the log instead of with the caller.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Count of running tasks plus a wakeup for when it reaches zero.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when the task finishes, however it ends.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// A set of fire-and-forget tasks whose errors are logged, not returned.
///
/// Tasks run detached on the tokio runtime: dropping the set does not cancel
/// them, they still complete and log.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    in_flight: Arc<InFlight>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` in the background. An `Err` or a panic is logged at warn
    /// level under `label`.
    ///
    /// Outside a tokio runtime the future is dropped and a warning logged.
    pub fn spawn<F, E>(&self, label: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(task = label, error = %e, "No tokio runtime, background task dropped");
                return;
            }
        };

        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(self.in_flight.clone());

        let work = handle.spawn(future);
        handle.spawn(async move {
            let _guard = guard;
            match work.await {
                Ok(Ok(())) => trace!(task = label, "Background task completed"),
                Ok(Err(e)) => warn!(task = label, error = %e, "Background task failed"),
                Err(e) => warn!(task = label, error = %e, "Background task did not complete"),
            }
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait until every spawned task, including ones spawned while
    /// waiting, has finished. Any number of callers may wait at once.
    pub async fn flush(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a wakeup in between is not missed.
            idle.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}
