//! Off-request task execution.
//!
//! A [`BackgroundWorker`] owns one tokio task that feeds queued tasks to a
//! [`BackgroundRunnable`] and calls it back on a fixed tick. Tasks outlive the
//! request that queued them: request cancellation never reaches the worker.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Logic driven by a [`BackgroundWorker`]. Calls are strictly sequential.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Handles one queued task.
    async fn run(&mut self, task: Self::Task);

    /// Runs once per tick interval. No-op unless overridden.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down, after queued tasks have
    /// been drained. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

/// Reasons a task could not be handed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker not running")]
    NotRunning,
    #[error("worker channel closed")]
    Closed,
    #[error("worker queue is full")]
    Full,
}

impl<T> From<mpsc::error::TrySendError<T>> for WorkerError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::Full,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerHandle
// ---------------------------------------------------------------------------

/// Cloneable, submit-only handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for WorkerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Enqueue a task without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Full`] when the queue is at capacity and
    /// [`WorkerError::Closed`] once the worker has stopped.
    pub fn try_submit(&self, task: T) -> Result<(), WorkerError> {
        self.tx.try_send(task).map_err(WorkerError::from)
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Owner of the spawned task driving a [`BackgroundRunnable`].
///
/// Queued tasks and ticks are interleaved on one task. `stop` closes the
/// queue, lets the runnable finish what was already queued, then runs its
/// shutdown hook.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable, tick interval, and
    /// queue capacity. Both are raised to their minimum (1 ms, 1 slot).
    pub fn start(mut runnable: R, tick_interval: Duration, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = tick_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // interval() completes its first tick immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(task) => runnable.run(task).await,
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        rx.close();
                        while let Some(task) = rx.recv().await {
                            runnable.run(task).await;
                        }
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> Result<(), WorkerError> {
        match &self.tx {
            Some(tx) => tx.send(task).await.map_err(|_| WorkerError::Closed),
            None => Err(WorkerError::NotRunning),
        }
    }

    /// A cloneable handle for non-blocking submission, or `None` once stopped.
    #[must_use]
    pub fn handle(&self) -> Option<WorkerHandle<R::Task>> {
        self.tx.as_ref().map(|tx| WorkerHandle { tx: tx.clone() })
    }

    /// Whether `stop` has not been called yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the worker gracefully, waiting for queued tasks and the shutdown
    /// hook to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background worker task ended abnormally");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        runs: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    struct Recorder {
        counters: Counters,
        delay: Duration,
    }

    #[async_trait]
    impl BackgroundRunnable for Recorder {
        type Task = u32;

        async fn run(&mut self, _task: u32) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.counters.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.counters.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder(counters: &Counters) -> Recorder {
        Recorder {
            counters: counters.clone(),
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn queued_tasks_run_before_shutdown_hook() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(recorder(&counters), Duration::from_secs(60), 16);

        for task in 1..=3 {
            worker.submit(task).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);

        worker.stop().await;
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn on_tick_follows_the_interval() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(recorder(&counters), Duration::from_millis(20), 16);

        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;

        assert!(counters.ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_queued_tasks() {
        let counters = Counters::default();
        let slow = Recorder {
            counters: counters.clone(),
            delay: Duration::from_millis(10),
        };
        let mut worker = BackgroundWorker::start(slow, Duration::from_secs(60), 16);
        let handle = worker.handle().unwrap();
        for i in 0..5 {
            handle.try_submit(i).unwrap();
        }

        worker.stop().await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 5);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn try_submit_reports_full_queue() {
        let counters = Counters::default();
        let slow = Recorder {
            counters: counters.clone(),
            delay: Duration::from_secs(10),
        };
        let mut worker = BackgroundWorker::start(slow, Duration::from_secs(60), 1);
        let handle = worker.handle().unwrap();

        // First task is picked up by the worker, second fills the queue.
        handle.try_submit(1).unwrap();
        tokio::task::yield_now().await;
        handle.try_submit(2).unwrap();
        assert_eq!(handle.try_submit(3), Err(WorkerError::Full));

        worker.stop().await;
    }

    #[tokio::test]
    async fn stopped_worker_rejects_submissions() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(recorder(&counters), Duration::from_secs(60), 16);
        let handle = worker.handle().unwrap();
        worker.stop().await;

        assert_eq!(
            worker.submit(7).await,
            Err(WorkerError::NotRunning)
        );
        assert!(worker.handle().is_none());
        assert_eq!(handle.try_submit(8), Err(WorkerError::Closed));
    }
}
