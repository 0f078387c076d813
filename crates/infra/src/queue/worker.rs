//! Worker pool pulling tasks from a delivery source.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::mux::TaskMux;
use super::task::{Task, TaskError, TaskOutcome};

/// Delivery system seam: hands out tasks to workers.
pub trait TaskSource: Send + Sync {
    /// Wait up to `timeout` for the next task.
    fn next_task(&self, timeout: Duration) -> Result<Option<Task>, SourceError>;
}

impl<S> TaskSource for Arc<S>
where
    S: TaskSource + ?Sized,
{
    fn next_task(&self, timeout: Duration) -> Result<Option<Task>, SourceError> {
        (**self).next_task(timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// No more tasks will ever be delivered.
    #[error("task source closed")]
    Closed,
    #[error("task source error: {0}")]
    Backend(String),
}

/// In-memory FIFO source for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Task) -> Result<(), SourceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SourceError::Backend("lock poisoned".to_string()))?;
        if state.closed {
            return Err(SourceError::Closed);
        }
        state.tasks.push_back(task);
        self.ready.notify_one();
        Ok(())
    }

    /// Stop accepting tasks; workers drain what is queued and then exit.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskSource for InMemoryTaskQueue {
    fn next_task(&self, timeout: Duration) -> Result<Option<Task>, SourceError> {
        let poisoned = || SourceError::Backend("lock poisoned".to_string());
        let state = self.state.lock().map_err(|_| poisoned())?;
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.tasks.is_empty() && !s.closed)
            .map_err(|_| poisoned())?;

        match state.tasks.pop_front() {
            Some(task) => Ok(Some(task)),
            None if state.closed => Err(SourceError::Closed),
            None => Ok(None),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How long a worker waits for a task before re-checking shutdown
    pub poll_interval: Duration,
    /// Number of worker threads
    pub concurrency: usize,
    /// Name for logging and thread names
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            concurrency: 4,
            name: "queue-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_discarded: u64,
    pub tasks_failed: u64,
    /// Tasks no handler could take ownership of (unknown type, bad payload).
    pub tasks_rejected: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Stop after in-flight tasks finish.
    pub fn shutdown(self) -> WorkerStats {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join()
    }

    /// Wait for the workers to exit on their own (source closed).
    pub fn join(mut self) -> WorkerStats {
        for j in self.joins.drain(..) {
            let _ = j.join();
        }
        self.stats()
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> WorkerStats {
        let mut stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Fixed-size pool of worker threads sharing one task source.
///
/// Workers share no job state; each task runs start to finish on the
/// thread that pulled it.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn<S>(mux: Arc<TaskMux>, source: Arc<S>, config: WorkerPoolConfig) -> std::io::Result<WorkerPoolHandle>
    where
        S: TaskSource + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let mut joins = Vec::with_capacity(config.concurrency);

        for index in 0..config.concurrency.max(1) {
            let name = format!("{}-{index}", config.name);
            let mux = mux.clone();
            let source = source.clone();
            let worker_shutdown = shutdown.clone();
            let stats = stats.clone();
            let poll_interval = config.poll_interval;
            let worker_name = name.clone();

            let join = thread::Builder::new().name(name).spawn(move || {
                worker_loop(&worker_name, &mux, source.as_ref(), &worker_shutdown, &stats, poll_interval);
            });

            match join {
                Ok(j) => joins.push(j),
                Err(e) => {
                    shutdown.store(true, Ordering::SeqCst);
                    for j in joins {
                        let _ = j.join();
                    }
                    return Err(e);
                }
            }
        }

        Ok(WorkerPoolHandle {
            shutdown,
            joins,
            stats,
            started: Instant::now(),
        })
    }
}

fn worker_loop<S: TaskSource + ?Sized>(
    name: &str,
    mux: &TaskMux,
    source: &S,
    shutdown: &AtomicBool,
    stats: &Mutex<WorkerStats>,
    poll_interval: Duration,
) {
    info!(worker = %name, "queue worker started");

    while !shutdown.load(Ordering::SeqCst) {
        let task = match source.next_task(poll_interval) {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(SourceError::Closed) => break,
            Err(e) => {
                error!(worker = %name, error = %e, "failed to fetch task");
                thread::sleep(poll_interval);
                continue;
            }
        };

        debug!(worker = %name, task_type = %task.type_name, "picked up task");
        update(stats, |s| s.current_running += 1);

        let result = run_task(mux, &task);

        update(stats, |s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.tasks_processed += 1;
            match &result {
                Ok(TaskOutcome::Succeeded) => s.tasks_succeeded += 1,
                Ok(TaskOutcome::Discarded) => s.tasks_discarded += 1,
                Ok(TaskOutcome::Failed { .. }) => s.tasks_failed += 1,
                Err(_) => s.tasks_rejected += 1,
            }
        });

        match result {
            Ok(TaskOutcome::Failed { errors }) => {
                debug!(worker = %name, task_type = %task.type_name, errors = ?errors, "task failed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(worker = %name, task_type = %task.type_name, error = %e, "task rejected");
            }
        }
    }

    info!(worker = %name, "queue worker stopped");
}

/// A panicking handler must not take the worker thread down with it.
fn run_task(mux: &TaskMux, task: &Task) -> Result<TaskOutcome, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(|| mux.dispatch(task))) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn update(stats: &Mutex<WorkerStats>, f: impl FnOnce(&mut WorkerStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drains_then_reports_closed() {
        let queue = InMemoryTaskQueue::new();
        queue.push(Task::new("a", serde_json::json!({}))).unwrap();
        queue.close();

        let first = queue.next_task(Duration::from_millis(10)).unwrap();
        assert_eq!(first.unwrap().type_name, "a");
        assert_eq!(queue.next_task(Duration::from_millis(10)), Err(SourceError::Closed));
        assert_eq!(queue.push(Task::new("b", serde_json::json!({}))), Err(SourceError::Closed));
    }

    #[test]
    fn empty_queue_times_out() {
        let queue = InMemoryTaskQueue::new();
        assert_eq!(queue.next_task(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn pool_processes_all_tasks_and_counts_outcomes() {
        let mut mux = TaskMux::new();
        mux.register_handler("ok", |_| Ok(TaskOutcome::Succeeded));
        mux.register_handler("old", |_| Ok(TaskOutcome::Discarded));
        mux.register_handler("bad", |_| {
            Ok(TaskOutcome::Failed {
                errors: vec!["nope".to_string()],
            })
        });
        mux.register_handler("boom", |_| panic!("handler exploded"));

        let queue = Arc::new(InMemoryTaskQueue::new());
        for t in ["ok", "ok", "old", "bad", "boom", "unknown"] {
            queue.push(Task::new(t, serde_json::json!({}))).unwrap();
        }
        queue.close();

        let handle = WorkerPool::spawn(
            Arc::new(mux),
            queue.clone(),
            WorkerPoolConfig::default()
                .with_concurrency(3)
                .with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap();
        let stats = handle.join();

        assert_eq!(stats.tasks_processed, 6);
        assert_eq!(stats.tasks_succeeded, 2);
        assert_eq!(stats.tasks_discarded, 1);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_rejected, 2);
        assert_eq!(stats.current_running, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn shutdown_stops_idle_workers() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let handle = WorkerPool::spawn(
            Arc::new(TaskMux::new()),
            queue,
            WorkerPoolConfig::default().with_poll_interval(Duration::from_millis(5)),
        )
        .unwrap();

        let stats = handle.shutdown();
        assert_eq!(stats.tasks_processed, 0);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let err = panic::catch_unwind(|| -> u8 { panic!("static str") }).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "static str");

        let err = panic::catch_unwind(|| -> u8 { panic!("formatted {}", 42) }).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "formatted 42");
    }
}
