//! Rate-limited concurrency lane
//!
//! A `GroupWorker` owns a priority queue of runnables and releases them for
//! execution while respecting its concurrency ceiling and the minimum spacing
//! between admissions.

use crate::queue::PriorityQueue;
use crate::WorkerError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// A unit of work waiting in a group queue
///
/// It receives the completion token for the slot it occupies and returns the
/// future that performs the work.
pub type Runnable = Box<dyn FnOnce(Done) -> BoxFuture<'static, ()> + Send + 'static>;

/// Construction parameters for a group worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Maximum number of tasks admitted at once
    pub max_concurrent: usize,

    /// Minimum spacing between two admissions
    pub rate_limit: Duration,

    /// Number of priority buckets
    pub priority_range: usize,

    /// Priority used when a submission carries none; midpoint when unset
    pub default_priority: Option<i64>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            rate_limit: Duration::ZERO,
            priority_range: 10,
            default_priority: None,
        }
    }
}

struct WorkerState {
    max_concurrent: usize,
    rate_limit: Duration,
    tasks_running: usize,
    scheduled_time: Instant,
    pending: PriorityQueue<Runnable>,
    priority_range: usize,
    default_priority: i64,
}

struct WorkerInner {
    state: Mutex<WorkerState>,
    runtime: Handle,
}

/// A single concurrency/rate-limit lane
///
/// Cloning is cheap; all clones share the same queue and counters.
#[derive(Clone)]
pub struct GroupWorker {
    inner: Arc<WorkerInner>,
}

impl GroupWorker {
    /// Creates a worker bound to the current tokio runtime
    ///
    /// # Errors
    ///
    /// * `WorkerError::ZeroConcurrency` - `max_concurrent` is 0
    /// * `WorkerError::NoRuntime` - called outside a tokio runtime
    pub fn new(settings: WorkerSettings) -> Result<Self, WorkerError> {
        let runtime = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        Self::with_handle(settings, runtime)
    }

    /// Creates a worker that spawns admitted tasks on `runtime`
    pub fn with_handle(settings: WorkerSettings, runtime: Handle) -> Result<Self, WorkerError> {
        if settings.max_concurrent == 0 {
            return Err(WorkerError::ZeroConcurrency);
        }
        Ok(Self::build(settings, runtime))
    }

    /// Builds a worker from settings that are known to be valid
    pub(crate) fn build(settings: WorkerSettings, runtime: Handle) -> Self {
        let priority_range = settings.priority_range.max(1);
        let last = priority_range as i64 - 1;
        let default_priority = settings
            .default_priority
            .unwrap_or(priority_range as i64 / 2)
            .clamp(0, last);

        let max_concurrent = if settings.rate_limit.is_zero() {
            settings.max_concurrent.max(1)
        } else {
            1
        };

        let state = WorkerState {
            max_concurrent,
            rate_limit: settings.rate_limit,
            tasks_running: 0,
            scheduled_time: Instant::now(),
            pending: PriorityQueue::new(priority_range),
            priority_range,
            default_priority,
        };

        Self {
            inner: Arc::new(WorkerInner {
                state: Mutex::new(state),
                runtime,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Updates the admission spacing
    ///
    /// A positive rate limit serializes the lane: `max_concurrent` becomes 1.
    pub fn set_rate_limit(&self, rate_limit: Duration) {
        let mut state = self.state();
        state.rate_limit = rate_limit;
        if !rate_limit.is_zero() {
            state.max_concurrent = 1;
        }
    }

    /// Parses a rate limit in milliseconds and applies it
    ///
    /// Negative values are accepted and behave like 0.
    pub fn set_rate_limit_str(&self, value: &str) -> Result<(), WorkerError> {
        let millis: i64 = value
            .trim()
            .parse()
            .map_err(|_| WorkerError::InvalidRateLimit(value.to_string()))?;
        self.set_rate_limit(Duration::from_millis(millis.max(0) as u64));
        Ok(())
    }

    /// Enqueues a runnable and runs the admission loop
    ///
    /// A missing priority means the worker's default; priorities at or above
    /// the range land in the last bucket.
    pub fn submit<F, Fut>(&self, priority: Option<i64>, work: F)
    where
        F: FnOnce(Done) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runnable: Runnable = Box::new(move |done| Box::pin(work(done)));
        self.submit_runnable(priority, runnable);
    }

    /// Enqueues an already boxed runnable
    pub fn submit_runnable(&self, priority: Option<i64>, runnable: Runnable) {
        {
            let mut state = self.state();
            let last = state.priority_range as i64 - 1;
            let priority = priority.unwrap_or(state.default_priority).min(last);
            state.pending.enqueue(runnable, priority);
        }

        self.work_loop();
    }

    /// Admits queued runnables while a slot is free
    ///
    /// The next admission time is reserved before the current runnable fires,
    /// so bursts of submissions never beat the rate limit.
    fn work_loop(&self) {
        loop {
            let (runnable, wait) = {
                let mut state = self.state();
                if state.tasks_running >= state.max_concurrent || state.pending.is_empty() {
                    return;
                }

                let now = Instant::now();
                let wait = state.scheduled_time.saturating_duration_since(now);
                state.scheduled_time = now + wait + state.rate_limit;

                let Some(runnable) = state.pending.dequeue() else {
                    return;
                };
                state.tasks_running += 1;
                (runnable, wait)
            };

            tracing::trace!("Admitting task after {:?}", wait);

            let done = Done {
                worker: Some(self.clone()),
            };
            self.inner.runtime.spawn(async move {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                runnable(done).await;
            });
        }
    }

    fn task_done(&self) {
        {
            let mut state = self.state();
            state.tasks_running = state.tasks_running.saturating_sub(1);
        }
        self.work_loop();
    }

    /// Number of admitted tasks that have not completed yet
    pub fn tasks_running(&self) -> usize {
        self.state().tasks_running
    }

    /// Number of tasks waiting for admission
    pub fn queued(&self) -> usize {
        self.state().pending.count()
    }

    /// Queued plus running tasks
    pub fn pending_tasks(&self) -> usize {
        let state = self.state();
        state.pending.count() + state.tasks_running
    }

    /// Returns whether nothing is queued or running
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0
    }

    pub fn max_concurrent(&self) -> usize {
        self.state().max_concurrent
    }

    pub fn rate_limit(&self) -> Duration {
        self.state().rate_limit
    }

    pub fn priority_range(&self) -> usize {
        self.state().priority_range
    }

    pub fn default_priority(&self) -> i64 {
        self.state().default_priority
    }

    /// Earliest time the next admission may happen
    pub fn scheduled_time(&self) -> Instant {
        self.state().scheduled_time
    }

    pub(crate) fn same_worker(&self, other: &GroupWorker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for GroupWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("GroupWorker")
            .field("max_concurrent", &state.max_concurrent)
            .field("rate_limit", &state.rate_limit)
            .field("tasks_running", &state.tasks_running)
            .field("queued", &state.pending.count())
            .finish()
    }
}

/// Completion token for one admitted slot
///
/// Consuming it with `complete` (or dropping it) frees the slot and lets the
/// worker admit the next task. It can only ever fire once.
pub struct Done {
    worker: Option<GroupWorker>,
}

impl Done {
    /// Frees the slot
    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.task_done();
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done")
            .field("pending", &self.worker.is_some())
            .finish()
    }
}
