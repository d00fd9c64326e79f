//! Fixed-size worker pool draining a shared in-process queue.
//!
//! The pool knows nothing about batches or pipelines: a task is any boxed
//! future returning `anyhow::Result<()>`. Each worker runs as an independent
//! tokio task and pulls the next message from a shared unbounded queue.
//!
//! # Features
//!
//! - Configurable number of workers (default 3)
//! - Non-blocking submission
//! - Panics and task errors are logged; the worker keeps running
//! - `wait_completion` waits until every submitted task has finished
//! - Sentinel-based shutdown: one sentinel per worker, queued behind
//!   pending tasks
//! - Pool statistics tracking

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default number of workers.
pub const DEFAULT_NUM_WORKERS: usize = 3;

/// A unit of work accepted by the pool.
pub type Task = BoxFuture<'static, anyhow::Result<()>>;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Pool has been shut down and accepts no more work.
    #[error("Pool has been shut down")]
    Closed,

    /// The configuration cannot produce a working pool.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Prefix of worker ids in logs.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            name: "worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the worker id prefix.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently running a task.
    pub active_workers: usize,
    /// Tasks submitted but not yet finished.
    pub pending_tasks: usize,
    /// Total number of tasks that returned `Ok`.
    pub tasks_completed: u64,
    /// Total number of tasks that returned `Err` or panicked.
    pub tasks_failed: u64,
    /// Average task duration.
    pub average_task_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of tasks processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics and outstanding work.
struct SharedPoolStats {
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
    pending: AtomicUsize,
    drained: Notify,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn task_submitted(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn task_finished(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.tasks_completed.load(Ordering::SeqCst);
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_tasks = completed + failed;
        let average_duration = if total_tasks > 0 {
            Duration::from_millis(total_duration_ms / total_tasks)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            pending_tasks: self.pending.load(Ordering::SeqCst),
            tasks_completed: completed,
            tasks_failed: failed,
            average_task_duration: average_duration,
        }
    }
}

enum Message {
    Run { name: String, task: Task },
    Shutdown,
}

/// Worker pool that runs submitted tasks on a fixed set of workers.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    worker_handles: StdMutex<Vec<JoinHandle<()>>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    accepting: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool. Workers are not spawned until [`WorkerPool::start`];
    /// tasks submitted before that wait in the queue.
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            worker_handles: StdMutex::new(Vec::new()),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
        }
    }

    /// Spawns all workers.
    ///
    /// # Errors
    ///
    /// `PoolError::AlreadyRunning` if started twice, `PoolError::Closed`
    /// after shutdown, `PoolError::InvalidConfig` for a zero-worker pool.
    pub fn start(&self) -> Result<(), PoolError> {
        if self.config.num_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let mut handles = self.handles();
        for i in 0..self.config.num_workers {
            let worker = Worker::new(
                format!("{}-{}", self.config.name, i + 1),
                Arc::clone(&self.receiver),
                Arc::clone(&self.stats),
            );

            handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    /// Queues a task without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` once shutdown has begun.
    pub fn submit<F>(&self, name: impl Into<String>, task: F) -> Result<(), PoolError>
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let name = name.into();
        self.stats.task_submitted();
        let message = Message::Run {
            name: name.clone(),
            task: task.boxed(),
        };

        if self.sender.send(message).is_err() {
            self.stats.task_finished();
            return Err(PoolError::Closed);
        }

        debug!(task = %name, "Task submitted");
        Ok(())
    }

    /// Waits until every submitted task has finished.
    pub async fn wait_completion(&self) {
        loop {
            let drained = self.stats.drained.notified();
            if self.stats.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Stops the pool after the work already queued.
    ///
    /// Enqueues exactly one sentinel per worker, then waits for every worker
    /// to exit. Tasks queued ahead of the sentinels still run; in-flight
    /// tasks are not cancelled. New submissions are rejected from here on.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool was never started or has
    /// already shut down.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");
        self.accepting.store(false, Ordering::SeqCst);

        for _ in 0..self.config.num_workers {
            // The receiver lives as long as the pool, so this cannot fail.
            let _ = self.sender.send(Message::Shutdown);
        }

        let handles = std::mem::take(&mut *self.handles());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally during shutdown");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Worker pool shutdown complete");
        Ok(())
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.worker_handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker that processes tasks from the shared queue.
struct Worker {
    /// Identifier used in logs.
    id: String,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    fn new(
        id: String,
        receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id,
            receiver,
            stats,
        }
    }

    /// Main worker loop: runs tasks until a sentinel arrives.
    async fn run(self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            let message = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };

            match message {
                Some(Message::Run { name, task }) => self.process_task(name, task).await,
                Some(Message::Shutdown) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                None => break,
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_task(&self, name: String, task: Task) {
        let start_time = Instant::now();
        debug!(worker_id = %self.id, task = %name, "Running task");

        self.stats.increment_active();
        let result = AssertUnwindSafe(task).catch_unwind().await;
        let duration = start_time.elapsed();
        self.stats.decrement_active();

        match result {
            Ok(Ok(())) => {
                self.stats.record_completion(duration);
                debug!(
                    worker_id = %self.id,
                    task = %name,
                    duration_ms = duration.as_millis() as u64,
                    "Task finished"
                );
            }
            Ok(Err(e)) => {
                self.stats.record_failure(duration);
                error!(worker_id = %self.id, task = %name, error = %e, "Task failed");
            }
            Err(panic) => {
                self.stats.record_failure(duration);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(worker_id = %self.id, task = %name, panic = %message, "Task panicked");
            }
        }

        self.stats.task_finished();
    }
}
