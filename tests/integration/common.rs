//! Shared helpers for the integration tests

use std::time::{Duration, Instant};
use sumi_lanes::crawler::Body;
use sumi_lanes::{CrawlOutcome, Release};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// What a callback saw, reduced to plain data
///
/// Responses carry a parsed document that cannot leave the callback, so
/// tests inspect this summary instead.
#[derive(Debug, Clone)]
pub struct Record {
    pub uri: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub charset: Option<String>,
    pub text: Option<String>,
    pub raw: Option<Vec<u8>>,
    pub has_document: bool,
    pub retries: u32,
    pub at: Instant,
}

impl Record {
    fn from_outcome(outcome: &CrawlOutcome) -> Self {
        match outcome {
            Ok(response) => Self {
                uri: response.task.describe(),
                status: Some(response.status),
                error: None,
                title: response.document.as_ref().and_then(|d| d.title()),
                charset: response.charset.clone(),
                text: response.text().map(str::to_string),
                raw: match &response.body {
                    Body::Bytes(bytes) => Some(bytes.clone()),
                    Body::Text(_) => None,
                },
                has_document: response.document.is_some(),
                retries: response.task.retries,
                at: Instant::now(),
            },
            Err(failure) => Self {
                uri: failure.task.describe(),
                status: failure.response.as_ref().map(|r| r.status),
                error: Some(failure.error.to_string()),
                title: None,
                charset: None,
                text: None,
                raw: None,
                has_document: false,
                retries: failure.task.retries,
                at: Instant::now(),
            },
        }
    }
}

/// Returns a callback that reports every outcome and releases its slot
pub fn recorder() -> (
    impl Fn(CrawlOutcome, Release) + Send + Sync + 'static,
    UnboundedReceiver<Record>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |outcome: CrawlOutcome, release: Release| {
        let _ = tx.send(Record::from_outcome(&outcome));
        release.release();
    };
    (callback, rx)
}

/// Waits for exactly `count` records
pub async fn collect(rx: &mut UnboundedReceiver<Record>, count: usize) -> Vec<Record> {
    let mut records = Vec::with_capacity(count);
    while records.len() < count {
        let record = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("Timed out waiting for a callback")
            .expect("Callback channel closed");
        records.push(record);
    }
    records
}

/// Asserts that no further record arrives within `wait`
pub async fn assert_no_more(rx: &mut UnboundedReceiver<Record>, wait: Duration) {
    if let Ok(Some(record)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("Unexpected callback: {:?}", record);
    }
}

/// Simple HTML page with a title
pub fn page(title: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><p>{}</p></body></html>",
        title, title
    )
}
