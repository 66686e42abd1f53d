//! Background workers (publisher loop, consumer loop, scheduler).
//!
//! Every worker is a future that runs until its [`CancellationToken`] fires.
//! [`WorkerHandle`] pairs the token with the task so shutdown is one call.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `work` with a child of `parent`, so cancelling the parent stops
    /// every worker while each can still be stopped on its own.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let join = tokio::spawn(work(cancel.clone()));
        info!(worker = name, "worker spawned");
        Self { name, cancel, join }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            warn!(worker = self.name, error = %err, "worker ended abnormally");
        } else {
            info!(worker = self.name, "worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_and_joins() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let root = CancellationToken::new();

        let handle = WorkerHandle::spawn("test", &root, move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(handle.name(), "test");

        handle.shutdown().await;
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_workers() {
        let root = CancellationToken::new();
        let handle = WorkerHandle::spawn("child", &root, |cancel| async move {
            cancel.cancelled().await;
        });

        root.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("worker ignored parent cancellation");
    }
}
