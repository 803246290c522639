use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// The task and stop token behind one worker.
///
/// Only the spawned loop touches the resources it owns; callers can only
/// request a stop and wait for the loop to release them.
#[derive(Debug, Default)]
pub(crate) struct WorkerTask {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerTask {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the loop unless one is already running. Returns whether a new
    /// loop was started.
    pub fn spawn<F, Fut>(&mut self, run: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return false;
        }

        let token = CancellationToken::new();
        self.handle = Some(tokio::spawn(run(token.clone())));
        self.cancel = Some(token);
        true
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Wait for the loop to exit. A loop still running at `deadline` is
    /// aborted, and this returns only once the aborted loop has been dropped,
    /// so any subprocess it owned has been killed. Returns whether the loop
    /// exited on its own.
    pub async fn join_until(&mut self, deadline: Instant, name: &str) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                if e.is_panic() {
                    error!("{} panicked: {}", name, e);
                }
                true
            }
            Err(_) => {
                warn!("{} did not stop before the deadline; aborting", name);
                handle.abort();
                // Resolves once the task's future has been dropped
                let _ = handle.await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_is_noop_while_running() {
        let mut task = WorkerTask::default();
        assert!(!task.is_running());

        assert!(task.spawn(|cancel| async move { cancel.cancelled().await }));
        assert!(task.is_running());
        assert!(!task.spawn(|cancel| async move { cancel.cancelled().await }));

        task.request_stop();
        assert!(task.stop_requested());
        assert!(task.join_until(Instant::now() + Duration::from_secs(1), "test").await);
        assert!(!task.is_running());
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_loop_is_dropped_before_join_returns() {
        let dropped = Arc::new(AtomicBool::new(false));
        let owned = DropFlag(Arc::clone(&dropped));

        let mut task = WorkerTask::default();
        task.spawn(move |_cancel| async move {
            let _owned = owned;
            std::future::pending::<()>().await;
        });

        let clean = task
            .join_until(Instant::now() + Duration::from_secs(1), "stubborn")
            .await;
        assert!(!clean);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_aborts_after_deadline() {
        let mut task = WorkerTask::default();
        task.spawn(|_cancel| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        task.request_stop();
        let clean = task
            .join_until(Instant::now() + Duration::from_secs(2), "stubborn")
            .await;
        assert!(!clean);
        assert!(!task.is_running());
    }
}
