use crate::config::{Config, TransformConfig, UserAgentConfig};
use crate::scheduler::WorkerSettings;
use crate::task::{RequestOptions, TaskOptions, Transform, UserAgent};
use std::time::Duration;

/// Crawler-wide settings plus the defaults every task is merged over
#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    /// Concurrency ceiling of every group
    pub max_connections: usize,

    /// Minimum spacing between admissions in a group
    pub rate_limit: Duration,

    /// Number of priority buckets per group
    pub priority_range: usize,

    /// Drop requests whose fingerprint was already seen
    pub skip_duplicates: bool,

    /// Rotate user-agent lists, one entry per request
    pub rotate_ua: bool,

    /// Sweep long-idle groups in the background
    pub auto_cleanup: bool,

    /// Per-task defaults, already layered over the built-in ones
    pub defaults: TaskOptions,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            rate_limit: Duration::ZERO,
            priority_range: 10,
            skip_duplicates: false,
            rotate_ua: false,
            auto_cleanup: false,
            defaults: TaskOptions::builtin(),
        }
    }
}

impl CrawlerOptions {
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn priority_range(mut self, priority_range: usize) -> Self {
        self.priority_range = priority_range;
        self
    }

    pub fn skip_duplicates(mut self, skip: bool) -> Self {
        self.skip_duplicates = skip;
        self
    }

    pub fn rotate_ua(mut self, rotate: bool) -> Self {
        self.rotate_ua = rotate;
        self
    }

    pub fn auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    /// Sets the task defaults; unset fields keep their built-in values
    pub fn defaults(mut self, defaults: TaskOptions) -> Self {
        self.defaults = defaults.merge_over(&TaskOptions::builtin());
        self
    }

    /// Settings every group worker is created with
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_concurrent: self.max_connections,
            rate_limit: self.rate_limit,
            priority_range: self.priority_range,
            default_priority: self.defaults.priority,
        }
    }
}

impl From<&Config> for CrawlerOptions {
    fn from(config: &Config) -> Self {
        let scheduler = &config.scheduler;
        let defaults = &config.defaults;
        let request = &defaults.request;

        let task_defaults = TaskOptions {
            request: RequestOptions {
                method: request.method.clone(),
                headers: (!request.headers.is_empty()).then(|| request.headers.clone()),
                timeout: request.timeout.map(Duration::from_millis),
                follow_redirect: request.follow_redirect,
                decompress: request.decompress,
                proxy: request.proxy.clone(),
                ..RequestOptions::default()
            },
            priority: defaults.priority,
            retries: defaults.retries,
            retry_timeout: defaults.retry_timeout.map(Duration::from_millis),
            transform: defaults.transform.as_ref().map(|transform| match transform {
                TransformConfig::Enabled(enabled) => Transform::from(*enabled),
                TransformConfig::Options(options) => Transform::Html(*options),
            }),
            force_utf8: defaults.force_utf8,
            incoming_encoding: defaults.incoming_encoding.clone(),
            raw: defaults.raw,
            user_agent: defaults.user_agent.as_ref().map(|agent| match agent {
                UserAgentConfig::Single(agent) => UserAgent::Fixed(agent.clone()),
                UserAgentConfig::List(agents) => UserAgent::rotating(agents.clone()),
            }),
            ..TaskOptions::default()
        };

        CrawlerOptions::default()
            .max_connections(scheduler.max_connections)
            .rate_limit(Duration::from_millis(scheduler.rate_limit))
            .priority_range(scheduler.priority_range)
            .skip_duplicates(scheduler.skip_duplicates)
            .rotate_ua(scheduler.rotate_ua)
            .auto_cleanup(scheduler.auto_cleanup)
            .defaults(task_defaults)
    }
}
