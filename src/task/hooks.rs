//! Extension points a task can carry
//!
//! - `UriSource`: resolves the real target URI asynchronously
//! - `PreRequest`: runs right before the transport call and may veto it
//! - `Callback`: receives the outcome of the task together with its release

use crate::crawler::{CrawlOutcome, Release};
use crate::task::Task;
use crate::PreRequestError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Produces the URI of a task when it is admitted
#[async_trait]
pub trait UriSource: Send + Sync {
    async fn resolve(&self) -> String;
}

/// Adapter turning an async closure into a [`UriSource`]
pub struct UriFn<F>(pub F);

#[async_trait]
impl<F, Fut> UriSource for UriFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = String> + Send,
{
    async fn resolve(&self) -> String {
        (self.0)().await
    }
}

/// Hook invoked before a task's transport call
///
/// Returning an error routes the task according to the error's `op`. The hook
/// may modify the task (headers, target, ...) before it is fetched.
#[async_trait]
pub trait PreRequest: Send + Sync {
    async fn before_request(&self, task: &mut Task) -> Result<(), PreRequestError>;
}

#[async_trait]
impl<F> PreRequest for F
where
    F: Fn(&mut Task) -> Result<(), PreRequestError> + Send + Sync,
{
    async fn before_request(&self, task: &mut Task) -> Result<(), PreRequestError> {
        self(task)
    }
}

/// Terminal callback of a task
///
/// The `Release` frees the task's group slot when consumed or dropped, so a
/// callback that needs to keep the slot while it does more work can move the
/// release into that work.
pub type Callback = Arc<dyn Fn(CrawlOutcome, Release) + Send + Sync>;
