use crate::crawler::encoder::Body;
use crate::crawler::parser::Document;
use crate::task::Task;
use crate::CrawlError;
use reqwest::header::HeaderMap;

/// A fetched (or inline) page as delivered to a callback
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// Final URL after redirects; empty for inline content
    pub url: String,
    pub headers: HeaderMap,
    /// Content type with empty `;` segments removed
    pub content_type: Option<String>,
    /// Charset the body was decoded from; `None` for raw bodies
    pub charset: Option<String>,
    pub body: Body,
    /// Parsed markup, when the transform ran
    pub document: Option<Document>,
    /// The task that produced this response
    pub task: Task,
}

impl Response {
    /// Body as text, unless it was kept raw
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            Body::Bytes(_) => None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.body {
            Body::Text(text) => text.as_bytes(),
            Body::Bytes(bytes) => bytes,
        }
    }

    /// Value of the response header `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A task that ended in error
///
/// Transform failures still carry the response they were computed from.
#[derive(Debug)]
pub struct Failure {
    pub error: CrawlError,
    pub task: Task,
    pub response: Option<Response>,
}

/// What a callback receives
pub type CrawlOutcome = Result<Response, Failure>;
