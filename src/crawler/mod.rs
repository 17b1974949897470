//! Crawler module: the task pipeline and its stages
//!
//! This module contains the core crawling logic, including:
//! - The `Crawler` front end, option merging and dedup
//! - The transport seam and its reqwest implementation
//! - Charset detection and body decoding
//! - The markup transform and the response delivered to callbacks

mod encoder;
mod events;
mod fetcher;
mod options;
mod parser;
mod pipeline;
mod response;

pub use encoder::{
    content_type, detect_charset, encode, extract_charset, is_html, is_transformable, transcode, Body,
    Encoded, DEFAULT_CHARSET,
};
pub use events::CrawlEvent;
pub use fetcher::{FetchRequest, RawResponse, ReqwestTransport, Transport};
pub use options::CrawlerOptions;
pub use parser::{transform, Document};
pub use pipeline::{Crawler, Release};
pub use response::{CrawlOutcome, Failure, Response};

