//! Task pipeline - the crawler front end
//!
//! This module drives every task from submission to its callback:
//! - Merging task options over the crawler defaults
//! - Deduplicating requests by fingerprint
//! - Routing tasks to their group worker
//! - Running the pre-request hook, the transport, the encoder and the transform
//! - Retrying failed fetches and raising `Drain` once everything settled

use crate::crawler::encoder::{self, Body};
use crate::crawler::events::CrawlEvent;
use crate::crawler::fetcher::{FetchRequest, RawResponse, ReqwestTransport, Transport};
use crate::crawler::options::CrawlerOptions;
use crate::crawler::parser;
use crate::crawler::response::{CrawlOutcome, Failure, Response};
use crate::output::CrawlStatistics;
use crate::scheduler::{Done, GroupRegistry, DEFAULT_GROUP};
use crate::state::TaskState;
use crate::task::{Callback, Target, Task, TaskOptions};
use crate::url::normalize_request;
use crate::{CrawlError, LanesError, PreRequestError, PreRequestOp, TransportError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 1024;

/// Fingerprints seen so far and whether duplicates are skipped
///
/// Skipping starts as configured and can only be turned off afterwards.
pub(crate) struct DedupState {
    enabled: AtomicBool,
    seen: Mutex<HashSet<String>>,
}

impl DedupState {
    fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            seen: Mutex::new(HashSet::new()),
        }
    }

    fn seen(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turns skipping off for good; returns whether it was on
    fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::SeqCst)
    }

    /// Marks `fingerprint` as seen; returns whether it is new
    fn mark(&self, fingerprint: String) -> bool {
        self.seen().insert(fingerprint)
    }

    fn clear(&self) {
        self.seen().clear();
    }
}

struct Shared {
    options: CrawlerOptions,
    registry: GroupRegistry,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    dedup: DedupState,
    events: broadcast::Sender<CrawlEvent>,
    stats: Arc<CrawlStatistics>,
}

/// Handle freeing a task's group slot
///
/// Consuming it with [`Release::release`] (or dropping it) frees the slot
/// once and raises [`CrawlEvent::Drain`] when nothing is left anywhere.
/// Direct tasks get a detached release that frees nothing.
pub struct Release {
    done: Option<Done>,
    shared: Option<Arc<Shared>>,
}

impl Release {
    fn bound(done: Done, shared: Arc<Shared>) -> Self {
        Self {
            done: Some(done),
            shared: Some(shared),
        }
    }

    fn detached() -> Self {
        Self {
            done: None,
            shared: None,
        }
    }

    /// Frees the slot now
    pub fn release(mut self) {
        self.finish();
    }

    /// Returns whether this release frees nothing
    pub fn is_detached(&self) -> bool {
        self.done.is_none()
    }

    fn finish(&mut self) {
        if let Some(done) = self.done.take() {
            done.complete();
        }
        if let Some(shared) = self.shared.take() {
            if shared.registry.is_empty() {
                tracing::debug!("All groups drained");
                let _ = shared.events.send(CrawlEvent::Drain);
            }
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for Release {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Release")
            .field("pending", &self.done.is_some())
            .finish()
    }
}

/// Moves `task` to `to`, forcing the state if the move is not expected
fn advance(task: &mut Task, to: TaskState) {
    if let Err(error) = task.transition(to) {
        tracing::warn!("{} for {}", error, task.describe());
        task.reset_state(to);
    }
}

/// Hands `outcome` to `callback`, or frees the slot when there is none
fn deliver(callback: Option<Callback>, outcome: CrawlOutcome, release: Release) {
    match callback {
        Some(callback) => callback(outcome, release),
        None => release.release(),
    }
}

impl Shared {
    /// Dedups `task` and submits it to its group
    ///
    /// Resubmissions (retries and requeues) skip the dedup check since their
    /// fingerprint was recorded on first submission.
    fn push_to_queue(self: &Arc<Self>, mut task: Task, check_duplicates: bool) {
        if check_duplicates && self.dedup.is_enabled() {
            if let Some(fingerprint) = normalize_request(&task) {
                if !self.dedup.mark(fingerprint) {
                    advance(&mut task, TaskState::Deduplicated);
                    self.stats.record_deduplicated();
                    tracing::debug!("Skipping duplicate {}", task.describe());
                    return;
                }
            }
        }

        self.stats.record_scheduled();
        let _ = self
            .events
            .send(CrawlEvent::Schedule(Box::new(task.clone())));

        let group = task.group.clone();
        let priority = task.priority;
        let shared = Arc::clone(self);
        self.registry
            .group(group.as_deref())
            .submit(priority, move |done| async move {
                let release = Release::bound(done, Arc::clone(&shared));
                shared.process(task, release).await;
            });
    }

    /// Resolves the target of an admitted task and builds its request
    async fn process(self: &Arc<Self>, mut task: Task, release: Release) {
        advance(&mut task, TaskState::Admitted);

        if let Target::Producer(source) = &task.target {
            let uri = source.resolve().await;
            task.target = Target::Uri(uri);
        }

        self.build_request(task, release).await;
    }

    async fn build_request(self: &Arc<Self>, mut task: Task, release: Release) {
        tracing::debug!("{} {}", task.request.method(), task.describe());

        if let Target::Inline(content) = &task.target {
            let raw = RawResponse::inline(content.clone());
            advance(&mut task, TaskState::Succeeded);
            self.process_content(raw, task, release);
            return;
        }

        if let Some(hook) = task.pre_request.clone() {
            advance(&mut task, TaskState::PreRequest);
            if let Err(error) = hook.before_request(&mut task).await {
                self.handle_pre_request_error(error, task, release).await;
                return;
            }
        }

        self.do_request(task, release).await;
    }

    async fn handle_pre_request_error(
        self: &Arc<Self>,
        error: PreRequestError,
        mut task: Task,
        release: Release,
    ) {
        tracing::debug!(
            "op: {:?} uri: {} msg: {}",
            error.op,
            task.describe(),
            error.message
        );

        match error.op {
            PreRequestOp::Fail => {
                advance(&mut task, TaskState::Failed);
                self.fail(CrawlError::PreRequest(error), task, release);
            }
            PreRequestOp::Abort => {
                advance(&mut task, TaskState::Aborted);
                self.stats.record_aborted();
                release.release();
            }
            PreRequestOp::Queue => {
                advance(&mut task, TaskState::Queued);
                self.stats.record_requeued();
                self.push_to_queue(task, false);
                release.release();
            }
            PreRequestOp::Other => {
                advance(&mut task, TaskState::Failed);
                self.handle_process_error(CrawlError::PreRequest(error), task, release)
                    .await;
            }
        }
    }

    async fn do_request(self: &Arc<Self>, mut task: Task, release: Release) {
        advance(&mut task, TaskState::Fetching);

        let Some(uri) = task.uri().map(str::to_string) else {
            advance(&mut task, TaskState::Failed);
            let error = CrawlError::Transport {
                uri: task.describe(),
                source: TransportError::InvalidRequest("task has no URI".to_string()),
            };
            self.handle_process_error(error, task, release).await;
            return;
        };

        let user_agent = task
            .user_agent
            .as_ref()
            .and_then(|agent| agent.select(self.options.rotate_ua));
        let request = FetchRequest::from_task(&task, &uri, user_agent);

        if task.skip_event_request != Some(true) {
            let _ = self
                .events
                .send(CrawlEvent::Request(Box::new(request.clone())));
        }

        self.stats.record_request();
        match self.transport.fetch(request).await {
            Ok(raw) => {
                advance(&mut task, TaskState::Succeeded);
                self.process_content(raw, task, release);
            }
            Err(source) => {
                advance(&mut task, TaskState::Failed);
                let error = CrawlError::Transport { uri, source };
                self.handle_process_error(error, task, release).await;
            }
        }
    }

    /// Retries `task` if it has retries left, otherwise reports the error
    ///
    /// The slot stays taken while the retry timeout runs.
    async fn handle_process_error(self: &Arc<Self>, error: CrawlError, mut task: Task, release: Release) {
        tracing::error!("{} ({} retries left)", error, task.retries);

        if task.retries == 0 {
            self.fail(error, task, release);
            return;
        }

        if self.dedup.disable() {
            tracing::info!("Retry scheduled, duplicate skipping is now off");
        }
        self.stats.record_retried();
        advance(&mut task, TaskState::Retrying);

        tokio::time::sleep(task.retry_timeout).await;

        task.retries -= 1;
        advance(&mut task, TaskState::Queued);
        self.push_to_queue(task, false);
        release.release();
    }

    /// Terminal error path: callback with the error
    fn fail(&self, error: CrawlError, mut task: Task, release: Release) {
        advance(&mut task, TaskState::Completed);
        self.stats.record_failed();
        let callback = task.callback.clone();
        deliver(
            callback,
            Err(Failure {
                error,
                task,
                response: None,
            }),
            release,
        );
    }

    /// Encodes and transforms a response, then hands it to the callback
    ///
    /// Kept synchronous: the parsed document is not `Send` and must never be
    /// held across an await.
    fn process_content(&self, raw: RawResponse, mut task: Task, release: Release) {
        tracing::debug!("Got {} bytes from {}", raw.body.len(), task.describe());

        let encoded = encoder::encode(&task, &raw);
        let content_type = encoder::content_type(&raw);
        let callback = task.callback.clone();
        advance(&mut task, TaskState::Completed);

        let mut response = Response {
            status: raw.status,
            url: raw.url,
            headers: raw.headers,
            content_type,
            charset: encoded.charset,
            body: encoded.body,
            document: None,
            task,
        };

        let skip_transform =
            response.task.request.method() == "HEAD" || !response.task.transform.is_enabled();
        if skip_transform {
            self.stats.record_succeeded();
            deliver(callback, Ok(response), release);
            return;
        }

        let inline = matches!(response.task.target, Target::Inline(_));
        let transformable = response
            .content_type
            .as_deref()
            .is_some_and(encoder::is_transformable);
        if !inline && !transformable {
            tracing::warn!(
                "Response body of {} is not HTML, skip transforming",
                response.task.describe()
            );
            self.stats.record_succeeded();
            deliver(callback, Ok(response), release);
            return;
        }

        let transformed = match &response.body {
            Body::Text(text) => parser::transform(text, &response.task.transform),
            Body::Bytes(bytes) => {
                parser::transform(&String::from_utf8_lossy(bytes), &response.task.transform)
            }
        };

        match transformed {
            Ok(document) => {
                response.document = document;
                self.stats.record_succeeded();
                deliver(callback, Ok(response), release);
            }
            Err(error) => {
                self.stats.record_failed();
                let task = response.task.clone();
                deliver(
                    callback,
                    Err(Failure {
                        error: CrawlError::Transform(error),
                        task,
                        response: Some(response),
                    }),
                    release,
                );
            }
        }
    }
}

/// Grouped, rate-limited crawler
///
/// Cloning is cheap; clones share groups, seen-set, events and statistics.
///
/// # Example
///
/// ```no_run
/// use sumi_lanes::{Crawler, CrawlerOptions, TaskOptions};
///
/// # async fn example() -> sumi_lanes::Result<()> {
/// let crawler = Crawler::new(CrawlerOptions::default().max_connections(2))?;
/// crawler.queue([TaskOptions::new("https://example.com/").callback(|outcome, release| {
///     if let Ok(response) = outcome {
///         println!("{} -> {}", response.url, response.status);
///     }
///     release.release();
/// })]);
/// crawler.drained().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Crawler {
    shared: Arc<Shared>,
}

impl Crawler {
    /// Creates a crawler using the reqwest transport
    ///
    /// # Errors
    ///
    /// * `LanesError::Worker` - invalid group settings, or no tokio runtime
    /// * `LanesError::Reqwest` - the HTTP client could not be built
    pub fn new(options: CrawlerOptions) -> Result<Self, LanesError> {
        let transport = ReqwestTransport::new()?;
        Self::with_transport(options, Arc::new(transport))
    }

    /// Creates a crawler sending requests through `transport`
    pub fn with_transport(
        options: CrawlerOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, LanesError> {
        let registry = GroupRegistry::new(options.worker_settings())?;
        let runtime = Handle::try_current().map_err(|_| crate::WorkerError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        if options.auto_cleanup {
            registry.start_auto_cleanup();
        }

        tracing::debug!(
            "Crawler ready: max_connections={} rate_limit={:?} priority_range={} skip_duplicates={}",
            options.max_connections,
            options.rate_limit,
            options.priority_range,
            options.skip_duplicates
        );

        Ok(Self {
            shared: Arc::new(Shared {
                dedup: DedupState::new(options.skip_duplicates),
                options,
                registry,
                transport,
                runtime,
                events,
                stats: Arc::new(CrawlStatistics::new()),
            }),
        })
    }

    /// Queues task specifications
    ///
    /// Strings are shorthand for a URI. Specs naming nothing to fetch are
    /// logged and skipped.
    pub fn queue<I, T>(&self, specs: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskOptions>,
    {
        for spec in specs {
            let spec = spec.into();
            if !spec.is_legal() {
                tracing::warn!("Illegal queue option: {:?}", spec);
                continue;
            }

            let merged = spec.merge_over(&self.shared.options.defaults);
            match Task::from_options(merged) {
                Some(task) => self.shared.push_to_queue(task, true),
                None => tracing::warn!("Illegal queue option after merge"),
            }
        }
    }

    /// Runs a task right away, outside every group
    ///
    /// The task is not deduplicated, never retried and takes no slot; its
    /// `Release` is detached. Only the task's own pre-request hook runs, and
    /// the `Request` event is suppressed unless the task sets
    /// `skip_event_request(false)`.
    ///
    /// # Errors
    ///
    /// * `LanesError::IllegalTask` - the spec names nothing to fetch
    /// * `LanesError::MissingCallback` - the spec has no callback
    pub fn direct(&self, spec: impl Into<TaskOptions>) -> Result<(), LanesError> {
        let spec = spec.into();
        if !spec.is_legal() {
            tracing::warn!("Illegal task option: {:?}", spec);
            return Err(LanesError::IllegalTask(format!("{:?}", spec.target)));
        }

        if spec.callback.is_none() {
            let uri = spec
                .target
                .as_ref()
                .and_then(|target| target.uri())
                .unwrap_or_default()
                .to_string();
            tracing::warn!("Direct request for {} has no callback", uri);
            return Err(LanesError::MissingCallback { uri });
        }

        let pre_request = spec.pre_request.clone();
        let mut merged = spec.merge_over(&self.shared.options.defaults);
        merged.pre_request = pre_request;
        merged.retries = Some(0);
        merged.skip_event_request = Some(merged.skip_event_request.unwrap_or(true));

        let task = Task::from_options(merged)
            .ok_or_else(|| LanesError::IllegalTask("direct task".to_string()))?;

        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            shared.process(task, Release::detached()).await;
        });
        Ok(())
    }

    /// Deletes every group and forgets seen fingerprints, if all groups are idle
    ///
    /// Returns whether anything was cleared.
    pub fn shrink(&self) -> bool {
        if !self.shared.registry.clear_if_idle() {
            tracing::debug!("Not shrinking: tasks are still pending");
            return false;
        }
        self.shared.dedup.clear();
        true
    }

    /// Queued plus running tasks across all groups
    pub fn queue_size(&self) -> usize {
        self.shared.registry.pending_tasks()
    }

    /// `group: <name>,running: <n>,pending: <n>` per group, joined by `;`
    pub fn status(&self) -> String {
        self.shared.registry.status()
    }

    /// Sets a property of one group by name
    ///
    /// Only `rateLimit` (also spelled `rate-limit`, in milliseconds) is
    /// known; other properties are ignored.
    ///
    /// # Errors
    ///
    /// * `LanesError::Worker` - the rate limit is not a number
    pub fn set_group_property(
        &self,
        group: Option<&str>,
        property: &str,
        value: &str,
    ) -> Result<(), LanesError> {
        match property {
            "rateLimit" | "rate-limit" => {
                self.shared.registry.group(group).set_rate_limit_str(value)?;
                tracing::info!(
                    "Group '{}' rate limit set to {}ms",
                    group.unwrap_or(DEFAULT_GROUP),
                    value
                );
            }
            _ => tracing::debug!("Ignoring unknown group property '{}'", property),
        }
        Ok(())
    }

    /// Subscribes to crawler events
    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.shared.events.subscribe()
    }

    /// Waits until no task is queued or running
    ///
    /// Returns immediately when the crawler is already idle.
    pub async fn drained(&self) {
        let mut events = self.subscribe();
        if self.shared.registry.is_empty() {
            return;
        }

        loop {
            match events.recv().await {
                Ok(CrawlEvent::Drain) => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.shared.registry.is_empty() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Returns whether duplicate skipping is currently on
    pub fn skip_duplicates(&self) -> bool {
        self.shared.dedup.is_enabled()
    }

    pub fn start_auto_cleanup(&self) {
        self.shared.registry.start_auto_cleanup();
    }

    pub fn stop_auto_cleanup(&self) {
        self.shared.registry.stop_auto_cleanup();
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.shared.registry
    }

    pub fn options(&self) -> &CrawlerOptions {
        &self.shared.options
    }

    pub fn stats(&self) -> Arc<CrawlStatistics> {
        Arc::clone(&self.shared.stats)
    }
}
