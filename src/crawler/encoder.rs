//! Charset detection and body decoding
//!
//! The charset is picked from, in order:
//! 1. the task's `incoming_encoding` override
//! 2. `charset=` in the content type
//! 3. `charset=` sniffed from the body, for HTML only
//! 4. `utf-8`

use crate::crawler::fetcher::RawResponse;
use crate::task::Task;
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;

static CHARSET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)charset=['"]?([\w.-]+)"#).unwrap());

static YEAR_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r":\d{4}$").unwrap());

/// Charset assumed when nothing else is known
pub const DEFAULT_CHARSET: &str = "utf-8";

/// Response body after encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    /// Kept as received because the task asked for `raw`
    Bytes(Vec<u8>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of encoding one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// `None` when the body was kept raw
    pub charset: Option<String>,
    pub body: Body,
}

/// Content type with empty `;` segments removed
pub fn content_type(raw: &RawResponse) -> Option<String> {
    let header = raw.headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let cleaned = header
        .split(';')
        .filter(|segment| !segment.trim().is_empty())
        .collect::<Vec<_>>()
        .join(";");
    Some(cleaned)
}

fn mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Returns whether `content_type` is an HTML type
pub fn is_html(content_type: &str) -> bool {
    mime(content_type) == "text/html"
}

/// Returns whether the markup transform applies to `content_type`
///
/// HTML, XHTML, `text/xml`, `application/xml` and any `+xml` type qualify.
pub fn is_transformable(content_type: &str) -> bool {
    let mime = mime(content_type);
    matches!(
        mime.as_str(),
        "text/html" | "application/xhtml+xml" | "text/xml" | "application/xml"
    ) || mime.ends_with("+xml")
}

/// Extracts a `charset=` value from `text`
///
/// Any spelling of gb2312 (ignoring case, punctuation and a `:yyyy` suffix)
/// is reported as `gbk`, its superset.
pub fn extract_charset(text: &str) -> Option<String> {
    let charset = CHARSET_PATTERN.captures(text)?.get(1)?.as_str();

    let stripped = YEAR_SUFFIX.replace(charset, "");
    let canonical: String = stripped
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if canonical == "gb2312" {
        Some("gbk".to_string())
    } else {
        Some(charset.to_string())
    }
}

/// Detects the charset of a response that has no per-task override
pub fn detect_charset(content_type: Option<&str>, body: &[u8]) -> String {
    if let Some(charset) = content_type.and_then(extract_charset) {
        return charset;
    }

    if !content_type.is_some_and(is_html) {
        return DEFAULT_CHARSET.to_string();
    }

    extract_charset(&String::from_utf8_lossy(body)).unwrap_or_else(|| DEFAULT_CHARSET.to_string())
}

/// Decodes `body` from `charset`, replacing malformed sequences
///
/// Unknown labels fall back to UTF-8.
pub fn transcode(body: &[u8], charset: &str) -> String {
    match Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => {
            let (text, _, had_errors) = encoding.decode(body);
            if had_errors {
                tracing::debug!("Body had malformed {} sequences", encoding.name());
            }
            text.into_owned()
        }
        None => {
            tracing::warn!("Unknown charset '{}', decoding as utf-8", charset);
            String::from_utf8_lossy(body).into_owned()
        }
    }
}

/// Encodes the body of `raw` as requested by `task`
///
/// With `force_utf8`, bodies in any charset other than `utf-8` or `ascii` are
/// transcoded. Otherwise the bytes are read as UTF-8.
pub fn encode(task: &Task, raw: &RawResponse) -> Encoded {
    if task.raw {
        return Encoded {
            charset: None,
            body: Body::Bytes(raw.body.clone()),
        };
    }

    let charset = match &task.incoming_encoding {
        Some(charset) => charset.clone(),
        None => detect_charset(content_type(raw).as_deref(), &raw.body),
    };

    let lowered = charset.to_ascii_lowercase();
    let text = if task.force_utf8 && lowered != "utf-8" && lowered != "ascii" {
        transcode(&raw.body, &charset)
    } else {
        String::from_utf8_lossy(&raw.body).into_owned()
    };

    Encoded {
        charset: Some(charset),
        body: Body::Text(text),
    }
}
