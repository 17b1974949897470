//! Sumi-Lanes: a grouped, rate-limited crawl-task scheduler
//!
//! This crate accepts a stream of fetch requests, deduplicates and prioritizes
//! them, dispatches them through isolated concurrency/rate-limited groups and
//! drives every task through a pre-request → fetch → encode → transform →
//! callback pipeline with retries.

pub mod config;
pub mod crawler;
pub mod output;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Lanes operations
#[derive(Debug, Error)]
pub enum LanesError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Group worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Direct request for {uri} has no callback")]
    MissingCallback { uri: String },

    #[error("Illegal task: {0}")]
    IllegalTask(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TaskState,
        to: state::TaskState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while building or reconfiguring a group worker
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("maxConcurrent must be a positive number")]
    ZeroConcurrency,

    #[error("rateLimit must be a number, got '{0}'")]
    InvalidRateLimit(String),

    #[error("group workers must be created inside a tokio runtime")]
    NoRuntime,
}

/// Failure delivered to a task callback
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Error {source} when fetching {uri}")]
    Transport {
        uri: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    PreRequest(#[from] PreRequestError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),
}

/// Errors reported by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors reported while turning a body into a queryable document
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("markup has {count} parse errors, first: {first}")]
    Malformed { count: usize, first: String },

    #[error("invalid selector '{0}'")]
    Selector(String),

    #[error("{0}")]
    Custom(String),
}

/// What a pre-request hook asks the pipeline to do with its task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreRequestOp {
    /// Invoke the callback with the error right away
    Fail,
    /// Release the slot without ever invoking the callback
    Abort,
    /// Put the task back into its group unchanged
    Queue,
    /// Anything else; handled like a transport failure
    Other,
}

/// Error returned by a pre-request hook
#[derive(Debug, Clone, Error)]
#[error("Error in preRequest, {message}")]
pub struct PreRequestError {
    pub op: PreRequestOp,
    pub message: String,
}

impl PreRequestError {
    pub fn new(op: PreRequestOp, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(PreRequestOp::Fail, message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(PreRequestOp::Abort, message)
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::new(PreRequestOp::Queue, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(PreRequestOp::Other, message)
    }
}

/// Result type alias for Sumi-Lanes operations
pub type Result<T> = std::result::Result<T, LanesError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    CrawlEvent, CrawlOutcome, Crawler, CrawlerOptions, Document, Failure, Release, Response,
};
pub use queue::PriorityQueue;
pub use scheduler::{GroupRegistry, GroupWorker};
pub use state::TaskState;
pub use task::{RequestBody, RequestOptions, Target, Task, TaskOptions, Transform, UserAgent};
pub use url::normalize_request;
