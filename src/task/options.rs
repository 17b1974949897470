use crate::crawler::{CrawlOutcome, Document, Release};
use crate::state::TaskState;
use crate::task::hooks::{Callback, PreRequest, UriFn, UriSource};
use crate::{LanesError, TransformError};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default priority of a task
pub const DEFAULT_PRIORITY: i64 = 5;

/// Default number of retries after a failed fetch
pub const DEFAULT_RETRIES: u32 = 3;

/// Default wait before a failed task is queued again
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default transport timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// What a task fetches
#[derive(Clone)]
pub enum Target {
    /// A plain URI
    Uri(String),
    /// A source that yields the URI once the task is admitted
    Producer(Arc<dyn UriSource>),
    /// Markup supplied by the caller; the transport is skipped
    Inline(String),
}

impl Target {
    /// Returns the URI if it is already known
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Uri(uri) => Some(uri),
            _ => None,
        }
    }

    fn is_legal(&self) -> bool {
        match self {
            Self::Uri(uri) => !uri.trim().is_empty(),
            Self::Producer(_) | Self::Inline(_) => true,
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
            Self::Inline(content) => write!(f, "Inline({} bytes)", content.len()),
        }
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON
    Json(serde_json::Value),
    /// Structured form fields, sent url-encoded
    Form(Vec<(String, String)>),
    /// A form that is already url-encoded (`a=1&b=2`)
    EncodedForm(String),
    /// Sent as-is
    Raw(String),
}

/// Transport options of a task
///
/// Every field is optional so that per-task options can be layered over the
/// crawler defaults with [`RequestOptions::merge_over`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<RequestBody>,
    pub search_params: Option<Vec<(String, String)>>,
    pub timeout: Option<Duration>,
    pub follow_redirect: Option<bool>,
    pub decompress: Option<bool>,
    pub proxy: Option<String>,
    pub cookie_jar: Option<Arc<reqwest::cookie::Jar>>,
}

impl RequestOptions {
    /// Fills every unset field from `defaults`
    pub fn merge_over(self, defaults: &RequestOptions) -> RequestOptions {
        RequestOptions {
            method: self.method.or_else(|| defaults.method.clone()),
            headers: self.headers.or_else(|| defaults.headers.clone()),
            body: self.body.or_else(|| defaults.body.clone()),
            search_params: self.search_params.or_else(|| defaults.search_params.clone()),
            timeout: self.timeout.or(defaults.timeout),
            follow_redirect: self.follow_redirect.or(defaults.follow_redirect),
            decompress: self.decompress.or(defaults.decompress),
            proxy: self.proxy.or_else(|| defaults.proxy.clone()),
            cookie_jar: self.cookie_jar.or_else(|| defaults.cookie_jar.clone()),
        }
    }

    /// Upper-cased method, `GET` when unset
    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn follow_redirect(&self) -> bool {
        self.follow_redirect.unwrap_or(false)
    }

    pub fn decompress(&self) -> bool {
        self.decompress.unwrap_or(true)
    }
}

/// Knobs of the built-in markup transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransformOptions {
    /// Parse the body as a fragment instead of a full document
    #[serde(default)]
    pub fragment: bool,

    /// Treat any markup parse error as a transform error
    #[serde(default)]
    pub strict: bool,
}

/// Custom transform over the decoded body
pub type TransformFn = Arc<dyn Fn(&str) -> Result<Document, TransformError> + Send + Sync>;

/// How a fetched body is turned into a queryable document
#[derive(Clone)]
pub enum Transform {
    Disabled,
    Html(TransformOptions),
    Custom(TransformFn),
}

impl Transform {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::Html(TransformOptions::default())
    }
}

impl From<bool> for Transform {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::default()
        } else {
            Self::Disabled
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Html(options) => f.debug_tuple("Html").field(options).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// User agent applied to a task's request
///
/// A rotating list is shared by reference: every task built from the same
/// list advances the same rotation.
#[derive(Debug, Clone)]
pub enum UserAgent {
    Fixed(String),
    Rotating(Arc<Mutex<VecDeque<String>>>),
}

impl UserAgent {
    pub fn rotating<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Rotating(Arc::new(Mutex::new(
            agents.into_iter().map(Into::into).collect(),
        )))
    }

    /// Picks the agent for one request
    ///
    /// With `rotate`, the head of a list is used and then moved to the tail.
    pub fn select(&self, rotate: bool) -> Option<String> {
        match self {
            Self::Fixed(agent) => Some(agent.clone()),
            Self::Rotating(list) => {
                let mut list = list.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if !rotate {
                    return list.front().cloned();
                }
                let head = list.pop_front()?;
                list.push_back(head.clone());
                Some(head)
            }
        }
    }
}

/// Caller-facing task specification
///
/// Unset fields fall back to the crawler defaults and then to the built-in
/// defaults. Crawler-wide settings (concurrency, rate limit, priority range,
/// dedup, user-agent rotation) live on `CrawlerOptions` and cannot be set per
/// task.
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub target: Option<Target>,
    pub request: RequestOptions,
    pub group: Option<String>,
    pub priority: Option<i64>,
    pub retries: Option<u32>,
    pub retry_timeout: Option<Duration>,
    pub transform: Option<Transform>,
    pub force_utf8: Option<bool>,
    pub incoming_encoding: Option<String>,
    pub raw: Option<bool>,
    pub skip_event_request: Option<bool>,
    pub user_agent: Option<UserAgent>,
    pub pre_request: Option<Arc<dyn PreRequest>>,
    pub callback: Option<Callback>,
}

impl TaskOptions {
    /// Task fetching `uri`
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            target: Some(Target::Uri(uri.into())),
            ..Self::default()
        }
    }

    /// Task whose URI is produced asynchronously on admission
    pub fn producer<F, Fut>(produce: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        Self {
            target: Some(Target::Producer(Arc::new(UriFn(produce)))),
            ..Self::default()
        }
    }

    /// Task processing caller-supplied markup without a fetch
    pub fn inline(content: impl Into<String>) -> Self {
        Self {
            target: Some(Target::Inline(content.into())),
            ..Self::default()
        }
    }

    /// Built-in defaults every crawler starts from
    pub fn builtin() -> Self {
        Self {
            request: RequestOptions {
                method: Some("GET".to_string()),
                timeout: Some(DEFAULT_TIMEOUT),
                follow_redirect: Some(false),
                decompress: Some(true),
                ..RequestOptions::default()
            },
            priority: Some(DEFAULT_PRIORITY),
            retries: Some(DEFAULT_RETRIES),
            retry_timeout: Some(DEFAULT_RETRY_TIMEOUT),
            transform: Some(Transform::default()),
            force_utf8: Some(false),
            raw: Some(false),
            ..Self::default()
        }
    }

    /// A spec is legal when it names something to process
    pub fn is_legal(&self) -> bool {
        self.target.as_ref().is_some_and(Target::is_legal)
    }

    /// Fills every unset field from `defaults`
    ///
    /// Transport options are merged field by field as well, so overriding one
    /// of them keeps the other defaults.
    pub fn merge_over(self, defaults: &TaskOptions) -> TaskOptions {
        TaskOptions {
            target: self.target.or_else(|| defaults.target.clone()),
            request: self.request.merge_over(&defaults.request),
            group: self.group.or_else(|| defaults.group.clone()),
            priority: self.priority.or(defaults.priority),
            retries: self.retries.or(defaults.retries),
            retry_timeout: self.retry_timeout.or(defaults.retry_timeout),
            transform: self.transform.or_else(|| defaults.transform.clone()),
            force_utf8: self.force_utf8.or(defaults.force_utf8),
            incoming_encoding: self
                .incoming_encoding
                .or_else(|| defaults.incoming_encoding.clone()),
            raw: self.raw.or(defaults.raw),
            skip_event_request: self.skip_event_request.or(defaults.skip_event_request),
            user_agent: self.user_agent.or_else(|| defaults.user_agent.clone()),
            pre_request: self.pre_request.or_else(|| defaults.pre_request.clone()),
            callback: self.callback.or_else(|| defaults.callback.clone()),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request
            .headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.request.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.request.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn encoded_form(mut self, form: impl Into<String>) -> Self {
        self.request.body = Some(RequestBody::EncodedForm(form.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.request.body = Some(RequestBody::Raw(body.into()));
        self
    }

    pub fn search_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request
            .search_params
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.request.follow_redirect = Some(follow);
        self
    }

    pub fn decompress(mut self, decompress: bool) -> Self {
        self.request.decompress = Some(decompress);
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.request.proxy = Some(proxy.into());
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<reqwest::cookie::Jar>) -> Self {
        self.request.cookie_jar = Some(jar);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_timeout(mut self, retry_timeout: Duration) -> Self {
        self.retry_timeout = Some(retry_timeout);
        self
    }

    pub fn transform(mut self, transform: impl Into<Transform>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn transform_with<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> Result<Document, TransformError> + Send + Sync + 'static,
    {
        self.transform = Some(Transform::Custom(Arc::new(transform)));
        self
    }

    pub fn force_utf8(mut self, force: bool) -> Self {
        self.force_utf8 = Some(force);
        self
    }

    pub fn incoming_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.incoming_encoding = Some(encoding.into());
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn skip_event_request(mut self, skip: bool) -> Self {
        self.skip_event_request = Some(skip);
        self
    }

    pub fn user_agent(mut self, agent: UserAgent) -> Self {
        self.user_agent = Some(agent);
        self
    }

    pub fn pre_request<P>(mut self, hook: P) -> Self
    where
        P: PreRequest + 'static,
    {
        self.pre_request = Some(Arc::new(hook));
        self
    }

    /// Same as [`TaskOptions::pre_request`] for a synchronous closure
    pub fn pre_request_fn<F>(self, hook: F) -> Self
    where
        F: Fn(&mut Task) -> Result<(), crate::PreRequestError> + Send + Sync + 'static,
    {
        self.pre_request(hook)
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(CrawlOutcome, Release) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

impl From<&str> for TaskOptions {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for TaskOptions {
    fn from(uri: String) -> Self {
        Self::new(uri)
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("target", &self.target)
            .field("request", &self.request)
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("retries", &self.retries)
            .field("transform", &self.transform)
            .field("pre_request", &self.pre_request.is_some())
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// A fully merged task as it moves through the pipeline
#[derive(Clone)]
pub struct Task {
    pub target: Target,
    pub request: RequestOptions,
    pub group: Option<String>,
    pub priority: Option<i64>,
    pub retries: u32,
    pub retry_timeout: Duration,
    pub transform: Transform,
    pub force_utf8: bool,
    pub incoming_encoding: Option<String>,
    pub raw: bool,
    pub skip_event_request: Option<bool>,
    pub user_agent: Option<UserAgent>,
    pub pre_request: Option<Arc<dyn PreRequest>>,
    pub callback: Option<Callback>,
    state: TaskState,
}

impl Task {
    /// Resolves merged options into a task
    ///
    /// Returns `None` when the options name nothing to process.
    pub fn from_options(options: TaskOptions) -> Option<Task> {
        if !options.is_legal() {
            return None;
        }
        let target = options.target?;

        Some(Task {
            target,
            request: options.request,
            group: options.group,
            priority: options.priority,
            retries: options.retries.unwrap_or(DEFAULT_RETRIES),
            retry_timeout: options.retry_timeout.unwrap_or(DEFAULT_RETRY_TIMEOUT),
            transform: options.transform.unwrap_or_default(),
            force_utf8: options.force_utf8.unwrap_or(false),
            incoming_encoding: options.incoming_encoding,
            raw: options.raw.unwrap_or(false),
            skip_event_request: options.skip_event_request,
            user_agent: options.user_agent,
            pre_request: options.pre_request,
            callback: options.callback,
            state: TaskState::Queued,
        })
    }

    /// The resolved URI, if the target is a plain URI
    pub fn uri(&self) -> Option<&str> {
        self.target.uri()
    }

    /// Label used in log lines
    pub fn describe(&self) -> String {
        match &self.target {
            Target::Uri(uri) => uri.clone(),
            Target::Producer(_) => "<pending uri>".to_string(),
            Target::Inline(_) => "<inline content>".to_string(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Moves the task to `to`
    ///
    /// # Errors
    ///
    /// * `LanesError::InvalidTransition` - the move is not part of the state machine
    pub fn transition(&mut self, to: TaskState) -> Result<(), LanesError> {
        if !self.state.can_transition_to(to) {
            return Err(LanesError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!("Task {}: {} -> {}", self.describe(), self.state, to);
        self.state = to;
        Ok(())
    }

    /// Places the task in `state` without checking the transition
    pub(crate) fn reset_state(&mut self, state: TaskState) {
        self.state = state;
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("target", &self.target)
            .field("request", &self.request)
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("retries", &self.retries)
            .field("retry_timeout", &self.retry_timeout)
            .field("transform", &self.transform)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
