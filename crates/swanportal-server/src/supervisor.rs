//! Worker lifecycle coordination.
//!
//! The supervisor owns one slot per worker and two counting barriers:
//! startup blocks until every worker has reported init, shutdown blocks
//! until every worker has drained. Quit fans out through per-worker
//! cancellation tokens.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Graceful deadline the HTTP servers are given on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct SupervisorInner {
    init_pending: AtomicUsize,
    quit_pending: AtomicUsize,
    init_notify: Notify,
    quit_notify: Notify,
    quit_tokens: Mutex<Vec<CancellationToken>>,
}

/// Coordinates startup readiness and cooperative shutdown across workers.
#[derive(Debug, Default, Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor with no registered workers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker slot.
    ///
    /// Must be called before [`wait_init`](Self::wait_init); each handle
    /// contributes one count to both barriers.
    pub fn register(&self) -> WorkerHandle {
        self.inner.init_pending.fetch_add(1, Ordering::AcqRel);
        self.inner.quit_pending.fetch_add(1, Ordering::AcqRel);

        let quit = CancellationToken::new();
        self.inner.quit_tokens.lock().push(quit.clone());

        WorkerHandle {
            quit,
            inner: self.inner.clone(),
            init_reported: AtomicBool::new(false),
            quit_reported: AtomicBool::new(false),
        }
    }

    /// Block until every registered worker has reported init.
    pub async fn wait_init(&self) {
        loop {
            let notified = self.inner.init_notify.notified();
            if self.inner.init_pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Block until every registered worker has reported quit.
    pub async fn wait_quit(&self) {
        loop {
            let notified = self.inner.quit_notify.notified();
            if self.inner.quit_pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Signal every worker to terminate.
    pub fn quit(&self) {
        for token in self.inner.quit_tokens.lock().iter() {
            token.cancel();
        }
    }
}

/// One worker's view of the supervisor.
#[derive(Debug)]
pub struct WorkerHandle {
    quit: CancellationToken,
    inner: Arc<SupervisorInner>,
    init_reported: AtomicBool,
    quit_reported: AtomicBool,
}

impl WorkerHandle {
    /// The worker's quit token; cancelled on shutdown fan-out.
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Completes when shutdown has been requested.
    pub async fn cancelled(&self) {
        self.quit.cancelled().await;
    }

    /// Report that the worker is ready to serve.
    ///
    /// Idempotent: reconnect loops may pass through their init point many
    /// times, only the first report counts.
    pub fn report_init_completed(&self) {
        if self
            .init_reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && self.inner.init_pending.fetch_sub(1, Ordering::AcqRel) == 1
        {
            self.inner.init_notify.notify_waiters();
        }
    }

    /// Report that the worker has drained after a quit signal.
    pub fn report_quit_completed(&self) {
        if self
            .quit_reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && self.inner.quit_pending.fetch_sub(1, Ordering::AcqRel) == 1
        {
            self.inner.quit_notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_init_barrier_waits_for_all() {
        let supervisor = Supervisor::new();
        let a = supervisor.register();
        let b = supervisor.register();

        a.report_init_completed();
        assert!(tokio::time::timeout(Duration::from_millis(50), supervisor.wait_init())
            .await
            .is_err());

        b.report_init_completed();
        tokio::time::timeout(Duration::from_secs(1), supervisor.wait_init())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_init_report_is_idempotent() {
        let supervisor = Supervisor::new();
        let a = supervisor.register();
        let b = supervisor.register();

        // Double-reporting one worker must not release the barrier.
        a.report_init_completed();
        a.report_init_completed();
        assert!(tokio::time::timeout(Duration::from_millis(50), supervisor.wait_init())
            .await
            .is_err());

        b.report_init_completed();
        supervisor.wait_init().await;
    }

    #[tokio::test]
    async fn test_quit_fan_out_and_barrier() {
        let supervisor = Supervisor::new();
        let a = supervisor.register();
        let b = supervisor.register();

        let worker = |handle: WorkerHandle| async move {
            handle.report_init_completed();
            handle.cancelled().await;
            handle.report_quit_completed();
        };
        tokio::spawn(worker(a));
        tokio::spawn(worker(b));

        supervisor.wait_init().await;
        supervisor.quit();
        tokio::time::timeout(Duration::from_secs(1), supervisor.wait_quit())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_on_empty_supervisor_returns() {
        let supervisor = Supervisor::new();
        supervisor.wait_init().await;
        supervisor.wait_quit().await;
    }
}
