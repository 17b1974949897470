//! Registry of named group workers
//!
//! Groups are created lazily on first reference and live until they are
//! explicitly deleted (or swept by the optional idle cleanup).

use crate::scheduler::worker::{GroupWorker, WorkerSettings};
use crate::WorkerError;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Group key used when a task names no group
pub const DEFAULT_GROUP: &str = "default";

/// How often the idle sweep runs
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// How long a group must have been idle before the sweep removes it
pub const IDLE_GROUP_TTL: Duration = Duration::from_secs(5 * 60);

struct RegistryInner {
    settings: WorkerSettings,
    runtime: Handle,
    // Creation order is part of the status contract
    workers: Mutex<Vec<(String, GroupWorker)>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

/// Maps group names to their workers
#[derive(Clone)]
pub struct GroupRegistry {
    inner: Arc<RegistryInner>,
}

impl GroupRegistry {
    /// Creates a registry whose groups all use `settings`
    ///
    /// The settings are validated up front so that creating a group later can
    /// never fail.
    pub fn new(settings: WorkerSettings) -> Result<Self, WorkerError> {
        let runtime = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        // Validate once with a throwaway worker
        GroupWorker::with_handle(settings.clone(), runtime.clone())?;

        Ok(Self {
            inner: Arc::new(RegistryInner {
                settings,
                runtime,
                workers: Mutex::new(Vec::new()),
                cleanup: Mutex::new(None),
            }),
        })
    }

    fn workers(&self) -> MutexGuard<'_, Vec<(String, GroupWorker)>> {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the worker for `name`, creating it on first use
    ///
    /// `None` maps to [`DEFAULT_GROUP`].
    pub fn group(&self, name: Option<&str>) -> GroupWorker {
        let key = name.unwrap_or(DEFAULT_GROUP);
        let mut workers = self.workers();

        if let Some((_, worker)) = workers.iter().find(|(name, _)| name == key) {
            return worker.clone();
        }

        let worker = GroupWorker::build(self.inner.settings.clone(), self.inner.runtime.clone());
        tracing::debug!("Created group '{}'", key);
        workers.push((key.to_string(), worker.clone()));
        worker
    }

    /// Removes the group `name` if nothing is queued or running in it
    ///
    /// Returns whether a group was removed.
    pub fn delete_group(&self, name: Option<&str>) -> bool {
        let key = name.unwrap_or(DEFAULT_GROUP);
        let mut workers = self.workers();

        let Some(index) = workers.iter().position(|(name, _)| name == key) else {
            return false;
        };

        if !workers[index].1.is_idle() {
            tracing::warn!("Refusing to delete busy group '{}'", key);
            return false;
        }

        workers.remove(index);
        tracing::debug!("Deleted group '{}'", key);
        true
    }

    /// Names of the currently materialized groups, in creation order
    pub fn groups(&self) -> Vec<String> {
        self.workers().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Queued plus running tasks across every group
    pub fn pending_tasks(&self) -> usize {
        self.workers()
            .iter()
            .map(|(_, worker)| worker.pending_tasks())
            .sum()
    }

    /// Returns whether no group has queued or running tasks
    pub fn is_empty(&self) -> bool {
        self.pending_tasks() == 0
    }

    /// One `group: <name>,running: <n>,pending: <n>` segment per group, joined by `;`
    pub fn status(&self) -> String {
        self.workers()
            .iter()
            .map(|(name, worker)| {
                format!(
                    "group: {},running: {},pending: {}",
                    name,
                    worker.tasks_running(),
                    worker.queued()
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Deletes every group at once, but only when all of them are idle
    ///
    /// Returns whether the groups were cleared.
    pub fn clear_if_idle(&self) -> bool {
        let mut workers = self.workers();
        if workers.iter().any(|(_, worker)| !worker.is_idle()) {
            return false;
        }
        workers.clear();
        true
    }

    /// Removes idle groups whose last reserved admission is older than `ttl`
    ///
    /// Returns the names of the removed groups.
    pub fn sweep_idle(&self, now: Instant, ttl: Duration) -> Vec<String> {
        let mut workers = self.workers();
        let mut removed = Vec::new();

        workers.retain(|(name, worker)| {
            let expired = worker.scheduled_time() + ttl < now && worker.is_idle();
            if expired {
                removed.push(name.clone());
            }
            !expired
        });

        if !removed.is_empty() {
            tracing::info!("Swept {} idle group(s): {}", removed.len(), removed.join(", "));
        }
        removed
    }

    /// Starts the periodic idle-group sweep, replacing any running one
    pub fn start_auto_cleanup(&self) {
        self.stop_auto_cleanup();

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let handle = self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                GroupRegistry { inner }.sweep_idle(Instant::now(), IDLE_GROUP_TTL);
            }
        });

        *self
            .inner
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    /// Stops the periodic idle-group sweep
    pub fn stop_auto_cleanup(&self) {
        let handle = self
            .inner
            .cleanup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Settings every new group is created with
    pub fn settings(&self) -> &WorkerSettings {
        &self.inner.settings
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Ok(mut cleanup) = self.cleanup.lock() {
            if let Some(handle) = cleanup.take() {
                handle.abort();
            }
        }
    }
}
