use crate::crawler::fetcher::FetchRequest;
use crate::task::Task;

/// Events published by a crawler
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// A task was accepted into a group, before admission
    Schedule(Box<Task>),
    /// The transport is about to be called
    Request(Box<FetchRequest>),
    /// No task is queued or running in any group
    Drain,
}

impl CrawlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Schedule(_) => "schedule",
            Self::Request(_) => "request",
            Self::Drain => "drain",
        }
    }
}
