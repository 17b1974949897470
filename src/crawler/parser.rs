//! Markup transform
//!
//! This module turns a decoded body into a queryable `Document`:
//! - Parsing as a full document or as a fragment
//! - Optional strict mode rejecting malformed markup
//! - Small selector helpers for text and attribute extraction

use crate::task::{Transform, TransformOptions};
use crate::TransformError;
use scraper::{Html, Selector};

/// Parsed markup attached to a response
///
/// Wraps a `scraper::Html`, which is reachable through [`Document::html`]
/// for queries the helpers do not cover.
pub struct Document {
    html: Html,
}

impl Document {
    /// Parses `markup` according to `options`
    ///
    /// # Errors
    ///
    /// * `TransformError::Malformed` - `options.strict` is set and the parser
    ///   reported errors
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_lanes::crawler::Document;
    /// use sumi_lanes::task::TransformOptions;
    ///
    /// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
    /// let document = Document::parse(html, TransformOptions::default()).unwrap();
    /// assert_eq!(document.title(), Some("Test".to_string()));
    /// ```
    pub fn parse(markup: &str, options: TransformOptions) -> Result<Self, TransformError> {
        let html = if options.fragment {
            Html::parse_fragment(markup)
        } else {
            Html::parse_document(markup)
        };

        if options.strict && !html.errors.is_empty() {
            return Err(TransformError::Malformed {
                count: html.errors.len(),
                first: html.errors[0].to_string(),
            });
        }

        Ok(Self { html })
    }

    /// Wraps an already parsed tree
    pub fn from_html(html: Html) -> Self {
        Self { html }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Extracts the page title from the `<title>` tag
    pub fn title(&self) -> Option<String> {
        self.select_first_text("title")
            .ok()
            .flatten()
            .filter(|s| !s.is_empty())
    }

    /// Trimmed text of every element matching `selector`
    pub fn select_text(&self, selector: &str) -> Result<Vec<String>, TransformError> {
        let selector = parse_selector(selector)?;
        Ok(self
            .html
            .select(&selector)
            .map(|element| element.text().collect::<String>().trim().to_string())
            .collect())
    }

    /// Trimmed text of the first element matching `selector`
    pub fn select_first_text(&self, selector: &str) -> Result<Option<String>, TransformError> {
        let selector = parse_selector(selector)?;
        Ok(self
            .html
            .select(&selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string()))
    }

    /// Value of `attr` on every matching element that carries it
    pub fn select_attr(&self, selector: &str, attr: &str) -> Result<Vec<String>, TransformError> {
        let selector = parse_selector(selector)?;
        Ok(self
            .html
            .select(&selector)
            .filter_map(|element| element.value().attr(attr))
            .map(str::to_string)
            .collect())
    }

    /// Number of elements matching `selector`
    pub fn count(&self, selector: &str) -> Result<usize, TransformError> {
        let selector = parse_selector(selector)?;
        Ok(self.html.select(&selector).count())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("errors", &self.html.errors.len())
            .finish_non_exhaustive()
    }
}

fn parse_selector(selector: &str) -> Result<Selector, TransformError> {
    Selector::parse(selector).map_err(|_| TransformError::Selector(selector.to_string()))
}

/// Runs the task's transform over a decoded body
///
/// Returns `Ok(None)` when the transform is disabled.
pub fn transform(body: &str, transform: &Transform) -> Result<Option<Document>, TransformError> {
    match transform {
        Transform::Disabled => Ok(None),
        Transform::Html(options) => Document::parse(body, *options).map(Some),
        Transform::Custom(custom) => custom(body).map(Some),
    }
}
