//! Task specifications and the merged task record
//!
//! Callers describe work with `TaskOptions`; the crawler merges them over its
//! defaults into a `Task` that travels through the pipeline.

mod hooks;
mod options;

pub use hooks::{Callback, PreRequest, UriFn, UriSource};
pub use options::{
    RequestBody, RequestOptions, Target, Task, TaskOptions, Transform, TransformFn,
    TransformOptions, UserAgent, DEFAULT_PRIORITY, DEFAULT_RETRIES, DEFAULT_RETRY_TIMEOUT,
    DEFAULT_TIMEOUT,
};
