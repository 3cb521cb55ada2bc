//! Task scheduling backends.
//!
//! The settlement engine never runs user code inline: producing actions,
//! continuation handlers, and pass-through adoptions all execute as tasks
//! handed to a [`Backend`]. The contract is deliberately thin — schedule a
//! zero-argument unit of work to run asynchronously on some thread, with no
//! ordering promise between unrelated tasks.
//!
//! Two implementations ship with the crate:
//!
//! - [`ThreadPoolBackend`]: the production backend. Worker threads are
//!   spawned lazily up to a maximum, park on a condition variable when
//!   idle, and retire down to a minimum after an idle timeout.
//! - [`ManualBackend`]: a deterministic single-thread backend for tests.
//!   `schedule` only enqueues; nothing runs until the test pumps the queue.
//!
//! There is no process-wide default backend. Every factory takes its
//! backend explicitly, and every promise broadcasts on the backend of the
//! factory that created it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;

/// A zero-argument unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The scheduling contract consumed by the settlement engine.
///
/// Implementations must accept tasks from any thread and run each exactly
/// once, asynchronously with respect to the scheduling call. No relative
/// ordering between scheduled tasks is required or assumed.
pub trait Backend: Send + Sync {
    /// Schedules a task to run on some thread, later.
    ///
    /// Must not execute `task` during this call.
    fn schedule(&self, task: Task);
}

/// Default idle timeout before retiring excess workers.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`ThreadPoolBackend`].
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `min_workers` | 1 |
/// | `max_workers` | available CPU parallelism |
/// | `idle_timeout` | 10 s |
/// | `thread_name_prefix` | `"pledge-worker"` |
#[derive(Clone)]
pub struct PoolConfig {
    /// Minimum number of worker threads kept alive.
    pub min_workers: usize,
    /// Maximum number of worker threads.
    pub max_workers: usize,
    /// Idle time after which workers above the minimum retire.
    pub idle_timeout: Duration,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
}

impl PoolConfig {
    /// Normalize configuration values to safe ones.
    ///
    /// Guarantees `max_workers >= min_workers >= 1` afterwards.
    pub fn normalize(&mut self) {
        if self.min_workers == 0 {
            self.min_workers = 1;
        }
        if self.max_workers < self.min_workers {
            self.max_workers = self.min_workers;
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "pledge-worker".to_string(),
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("min_workers", &self.min_workers)
            .field("max_workers", &self.max_workers)
            .field("idle_timeout", &self.idle_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish()
    }
}

/// A worker-thread pool implementing [`Backend`].
///
/// Workers are spawned lazily as load arrives, up to
/// [`PoolConfig::max_workers`]. An idle worker parks on a condition
/// variable; after [`PoolConfig::idle_timeout`] without work, workers above
/// [`PoolConfig::min_workers`] retire.
///
/// # Shutdown
///
/// [`shutdown`](Self::shutdown) drains already-queued tasks, then joins the
/// workers. Tasks scheduled after shutdown began are dropped with a
/// warning; any promise depending on them simply never settles, consistent
/// with the engine's liveness stance.
pub struct ThreadPoolBackend {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    /// Injector queue. Lock-free; the mutex below exists only for parking.
    queue: SegQueue<Task>,
    /// Number of queued, not-yet-started tasks.
    pending: AtomicUsize,
    /// Number of live worker threads.
    workers: AtomicUsize,
    /// Number of workers currently executing a task.
    busy: AtomicUsize,
    /// Monotonic worker id source, for thread names.
    next_worker_id: AtomicU64,
    shutdown: AtomicBool,
    /// Parking lot for idle workers.
    park_mutex: Mutex<()>,
    work_available: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolBackend {
    /// Creates a pool with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool with the given configuration (normalized first).
    #[must_use]
    pub fn with_config(mut config: PoolConfig) -> Self {
        config.normalize();
        let min_workers = config.min_workers;
        let backend = Self {
            inner: Arc::new(PoolInner {
                config,
                queue: SegQueue::new(),
                pending: AtomicUsize::new(0),
                workers: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                next_worker_id: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                park_mutex: Mutex::new(()),
                work_available: Condvar::new(),
                handles: Mutex::new(Vec::new()),
            }),
        };
        for _ in 0..min_workers {
            spawn_worker(&backend.inner);
        }
        backend
    }

    /// Number of queued, not-yet-started tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.workers.load(Ordering::Acquire)
    }

    /// Returns true once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Shuts the pool down, draining queued tasks and joining workers.
    ///
    /// Returns `true` if every worker exited before the deadline. Must not
    /// be called from a worker thread.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown.store(true, Ordering::Release);
        self.notify_all();

        let deadline = std::time::Instant::now() + timeout;
        while self.inner.workers.load(Ordering::Acquire) > 0 {
            if std::time::Instant::now() >= deadline {
                tracing::warn!("pool shutdown timed out with workers still live");
                return false;
            }
            self.notify_all();
            thread::sleep(Duration::from_millis(5));
        }

        let mut handles = self.inner.handles.lock().expect("pool handles poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        true
    }

    fn notify_all(&self) {
        let _guard = self.inner.park_mutex.lock().expect("pool lock poisoned");
        self.inner.work_available.notify_all();
    }
}

impl Default for ThreadPoolBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadPoolBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolBackend")
            .field("workers", &self.worker_count())
            .field("pending", &self.pending_tasks())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Backend for ThreadPoolBackend {
    fn schedule(&self, task: Task) {
        let inner = &self.inner;
        if inner.shutdown.load(Ordering::Acquire) {
            tracing::warn!("task scheduled after pool shutdown; dropping");
            return;
        }
        inner.queue.push(task);
        inner.pending.fetch_add(1, Ordering::Release);

        maybe_spawn_worker(inner);
        // Wake one parked worker. Workers re-check the queue under this
        // same mutex before parking, so the wakeup cannot be lost.
        let _guard = inner.park_mutex.lock().expect("pool lock poisoned");
        inner.work_available.notify_one();
    }
}

impl Drop for ThreadPoolBackend {
    fn drop(&mut self) {
        // Signal only. Joining here could deadlock when the final handle is
        // dropped from a worker thread, so threads are left to notice the
        // flag and exit.
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.park_mutex.lock().expect("pool lock poisoned");
        self.inner.work_available.notify_all();
    }
}

/// Spawn a worker if there is queued work and nobody free to take it.
fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    let workers = inner.workers.load(Ordering::Acquire);
    let busy = inner.busy.load(Ordering::Acquire);
    if workers < inner.config.max_workers
        && busy >= workers
        && inner.pending.load(Ordering::Acquire) > 0
    {
        spawn_worker(inner);
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let worker_id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{worker_id}", inner.config.thread_name_prefix);
    inner.workers.fetch_add(1, Ordering::AcqRel);

    let inner_clone = Arc::clone(inner);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            tracing::debug!(worker_id, "pool worker started");
            worker_loop(&inner_clone, worker_id);
            inner_clone.workers.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(worker_id, "pool worker retired");
        })
        .expect("failed to spawn pool worker");

    inner.handles.lock().expect("pool handles poisoned").push(handle);
}

fn worker_loop(inner: &PoolInner, worker_id: u64) {
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::AcqRel);
            inner.busy.fetch_add(1, Ordering::AcqRel);
            // Tasks wrap their own user-code panics into rejections; a
            // panic escaping here is an engine bug, but still must not take
            // the worker down.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            inner.busy.fetch_sub(1, Ordering::AcqRel);
            if outcome.is_err() {
                tracing::error!(worker_id, "scheduled task panicked past its guard");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        // Park. The queue is re-checked under the mutex so a schedule()
        // that pushed and notified in between is never missed.
        let guard = inner.park_mutex.lock().expect("pool lock poisoned");
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        let (guard, timeout) = inner
            .work_available
            .wait_timeout(guard, inner.config.idle_timeout)
            .expect("pool lock poisoned");
        drop(guard);

        if timeout.timed_out()
            && inner.queue.is_empty()
            && !inner.shutdown.load(Ordering::Acquire)
            && inner.workers.load(Ordering::Acquire) > inner.config.min_workers
        {
            break;
        }
    }
}

/// A deterministic backend for tests.
///
/// `schedule` never runs anything; tasks accumulate until the owning test
/// pumps them with [`run_one`](Self::run_one) or
/// [`run_until_idle`](Self::run_until_idle) on its own thread. This keeps
/// the no-inline-execution contract observable (the scheduling call itself
/// never executes the task) while making interleavings reproducible.
#[derive(Default)]
pub struct ManualBackend {
    queue: SegQueue<Task>,
}

impl ManualBackend {
    /// Creates an empty manual backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Runs the oldest queued task, if any. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        match self.queue.pop() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks (including ones they enqueue) until none remain.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl fmt::Debug for ManualBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualBackend")
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Backend for ManualBackend {
    fn schedule(&self, task: Task) {
        self.queue.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn config_normalize_repairs_inversions() {
        let mut config = PoolConfig {
            min_workers: 0,
            max_workers: 0,
            ..PoolConfig::default()
        };
        config.normalize();
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 1);

        let mut config = PoolConfig {
            min_workers: 4,
            max_workers: 2,
            ..PoolConfig::default()
        };
        config.normalize();
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn pool_runs_scheduled_tasks() {
        let pool = ThreadPoolBackend::with_config(PoolConfig {
            min_workers: 1,
            max_workers: 2,
            ..PoolConfig::default()
        });
        let counter = Arc::new(AtomicI32::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.schedule(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::Relaxed) < 50 {
            assert!(std::time::Instant::now() < deadline, "tasks did not drain");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn pool_task_runs_off_caller_thread() {
        let pool = ThreadPoolBackend::new();
        let caller = thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();

        pool.schedule(Box::new(move || {
            let _ = tx.send(thread::current().id());
        }));

        let worker = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        assert_ne!(worker, caller);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn pool_drops_tasks_after_shutdown() {
        let pool = ThreadPoolBackend::new();
        assert!(pool.shutdown(Duration::from_secs(5)));

        let counter = Arc::new(AtomicI32::new(0));
        let counter_clone = Arc::clone(&counter);
        pool.schedule(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        }));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pool_panicking_task_does_not_kill_worker() {
        let pool = ThreadPoolBackend::with_config(PoolConfig {
            min_workers: 1,
            max_workers: 1,
            ..PoolConfig::default()
        });
        pool.schedule(Box::new(|| panic!("task panic")));

        let counter = Arc::new(AtomicI32::new(0));
        let counter_clone = Arc::clone(&counter);
        pool.schedule(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        }));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::Relaxed) == 0 {
            assert!(std::time::Instant::now() < deadline, "worker died");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn manual_backend_defers_until_pumped() {
        let backend = ManualBackend::new();
        let counter = Arc::new(AtomicI32::new(0));

        let counter_clone = Arc::clone(&counter);
        backend.schedule(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert_eq!(backend.pending_tasks(), 1);
        assert_eq!(backend.run_until_idle(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(!backend.run_one());
    }

    #[test]
    fn manual_backend_runs_tasks_queued_by_tasks() {
        let backend = Arc::new(ManualBackend::new());
        let counter = Arc::new(AtomicI32::new(0));

        let backend_clone = Arc::clone(&backend);
        let counter_clone = Arc::clone(&counter);
        backend.schedule(Box::new(move || {
            let counter_inner = Arc::clone(&counter_clone);
            backend_clone.schedule(Box::new(move || {
                counter_inner.fetch_add(10, Ordering::Relaxed);
            }));
            counter_clone.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(backend.run_until_idle(), 2);
        assert_eq!(counter.load(Ordering::Relaxed), 11);
    }
}
