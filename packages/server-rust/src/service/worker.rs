//! Background worker for fire-and-forget broker work.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc
//! channel via a `BackgroundRunnable` implementation, with periodic tick
//! callbacks. [`WorkItemRunner`] runs boxed futures on it and [`WorkQueue`] is
//! the [`TaskScheduler`] handle the broker queues background batches on.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::config::BrokerConfig;
use crate::traits::TaskScheduler;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Periodically calls `BackgroundRunnable::on_tick()` at the configured interval
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable, tick interval, and
    /// channel capacity.
    ///
    /// Must be called from within a tokio runtime. A zero interval or capacity
    /// is raised to the smallest legal value.
    pub fn start(runnable: R, tick_interval: Duration, capacity: usize) -> Self {
        Self::with_channel(runnable, tick_interval, mpsc::channel(capacity.max(1)))
    }

    fn with_channel(
        mut runnable: R,
        tick_interval: Duration,
        (tx, mut rx): (mpsc::Sender<R::Task>, mpsc::Receiver<R::Task>),
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let period = tick_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(period);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
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

    /// Submit a task to the worker, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// A sender for this worker's channel, `None` once stopped.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::Sender<R::Task>> {
        self.tx.clone()
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        // Signal shutdown.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Close the task channel.
        self.tx.take();
        // Wait for the worker task to finish.
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// WorkItemRunner
// ---------------------------------------------------------------------------

/// A unit of background work.
pub type WorkItem = BoxFuture<'static, ()>;

/// Runs each [`WorkItem`] as its own task.
///
/// Finished tasks are reaped on every tick; shutdown waits for the rest.
#[derive(Default)]
pub struct WorkItemRunner {
    tasks: JoinSet<()>,
}

impl WorkItemRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                warn!(error = %e, "background work item panicked");
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for WorkItemRunner {
    type Task = WorkItem;

    async fn run(&mut self, task: WorkItem) {
        self.tasks.spawn(task);
    }

    async fn on_tick(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            Self::record(result);
        }
    }

    async fn shutdown(&mut self) {
        debug!(pending = self.tasks.len(), "waiting for background work");
        while let Some(result) = self.tasks.join_next().await {
            Self::record(result);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkQueue
// ---------------------------------------------------------------------------

/// [`TaskScheduler`] handle feeding a [`WorkItemRunner`] worker.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
}

impl WorkQueue {
    #[must_use]
    pub fn new(tx: mpsc::Sender<WorkItem>) -> Self {
        Self { tx }
    }

    /// Starts a [`WorkItemRunner`] worker sized by `config` and returns it
    /// with its queue.
    #[must_use]
    pub fn start(config: &BrokerConfig) -> (BackgroundWorker<WorkItemRunner>, Self) {
        let (tx, rx) = mpsc::channel(config.worker_channel_capacity.max(1));
        let worker = BackgroundWorker::with_channel(
            WorkItemRunner::new(),
            config.worker_tick_interval,
            (tx.clone(), rx),
        );
        (worker, Self::new(tx))
    }
}

impl TaskScheduler for WorkQueue {
    fn queue_background_work_item(&self, work: WorkItem) {
        if let Err(e) = self.tx.try_send(work) {
            warn!(error = %e, "failed to queue background work item");
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

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        tick_count: Arc<AtomicU32>,
        shutdown_called: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.tick_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_called.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (CountingRunnable, Arc<AtomicU32>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let run_count = Arc::new(AtomicU32::new(0));
        let tick_count = Arc::new(AtomicU32::new(0));
        let shutdown_called = Arc::new(AtomicU32::new(0));
        let runnable = CountingRunnable {
            run_count: run_count.clone(),
            tick_count: tick_count.clone(),
            shutdown_called: shutdown_called.clone(),
        };
        (runnable, run_count, tick_count, shutdown_called)
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let (runnable, run_count, _, shutdown_called) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60), 8);

        worker.submit("task-1".to_string()).await.unwrap();
        worker.submit("task-2".to_string()).await.unwrap();
        worker.submit("task-3".to_string()).await.unwrap();

        // Give the worker time to process tasks.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(run_count.load(Ordering::SeqCst), 3);

        worker.stop().await;

        assert_eq!(shutdown_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let (runnable, _, tick_count, _) = counting();

        // Very short tick interval for testing.
        let mut worker = BackgroundWorker::start(runnable, Duration::from_millis(20), 8);

        // Wait for a few ticks.
        tokio::time::sleep(Duration::from_millis(100)).await;

        worker.stop().await;

        // Should have at least 2 ticks in 100ms with 20ms interval.
        assert!(tick_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let (runnable, _, _, _) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60), 8);
        worker.stop().await;

        let result = worker.submit("late-task".to_string()).await;
        assert!(result.is_err());
        assert!(worker.sender().is_none());
    }

    #[tokio::test]
    async fn queued_work_runs_and_shutdown_waits_for_it() {
        let config = BrokerConfig {
            worker_tick_interval: Duration::from_millis(10),
            ..BrokerConfig::default()
        };
        let (mut worker, queue) = WorkQueue::start(&config);
        let done = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let done = Arc::clone(&done);
            queue.queue_background_work_item(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        worker.stop().await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn full_queue_drops_work() {
        let (tx, _rx) = mpsc::channel::<WorkItem>(1);
        let queue = WorkQueue::new(tx);
        let ran = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            queue.queue_background_work_item(Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(queue.tx.capacity(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_work_does_not_stop_the_worker() {
        let (mut worker, queue) = WorkQueue::start(&BrokerConfig::default());
        let done = Arc::new(AtomicU32::new(0));

        queue.queue_background_work_item(Box::pin(async { panic!("boom") }));
        let flag = Arc::clone(&done);
        queue.queue_background_work_item(Box::pin(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.stop().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
