use crate::task::{RequestBody, RequestOptions, Target, Task};
use url::form_urlencoded;

/// Methods whose body takes part in the fingerprint
const BODY_METHODS: &[&str] = &["POST", "PUT", "PATCH"];

/// Computes the dedup fingerprint of a task
///
/// # Fingerprint Layout
///
/// `<METHOD>\r\n<uri with query>\r\n<body>`
///
/// 1. The method is upper-cased (`GET` when unset)
/// 2. Structured query parameters are appended only when the URI has no query
/// 3. For POST/PUT/PATCH the body is canonicalized:
///    - JSON is serialized with sorted keys
///    - structured forms become sorted `k=v` pairs joined by `&`
///    - pre-encoded forms are split on `&`, sorted and rejoined
/// 4. Every other method has an empty body segment
///
/// # Returns
///
/// `None` for targets without a URI at enqueue time (producers and inline
/// content); those tasks are never deduplicated.
///
/// # Examples
///
/// ```
/// use sumi_lanes::{normalize_request, Task, TaskOptions};
///
/// let task = Task::from_options(TaskOptions::new("http://example.com/a")).unwrap();
/// assert_eq!(
///     normalize_request(&task).as_deref(),
///     Some("GET\r\nhttp://example.com/a\r\n")
/// );
/// ```
pub fn normalize_request(task: &Task) -> Option<String> {
    let Target::Uri(uri) = &task.target else {
        return None;
    };
    Some(fingerprint(uri, &task.request))
}

fn fingerprint(uri: &str, request: &RequestOptions) -> String {
    let method = request.method();
    let uri = with_search_params(uri, request.search_params.as_deref());

    let body = if BODY_METHODS.contains(&method.as_str()) {
        canonical_body(request.body.as_ref())
    } else {
        String::new()
    };

    [method.as_str(), uri.as_str(), body.as_str()].join("\r\n")
}

/// Appends form-encoded `params` to `uri` unless it already has a query
pub fn with_search_params(uri: &str, params: Option<&[(String, String)]>) -> String {
    match params {
        Some(params) if !params.is_empty() && !uri.contains('?') => {
            format!("{}?{}", uri, encode_pairs(params))
        }
        _ => uri.to_string(),
    }
}

/// Form-encodes `pairs` in the order given
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

fn canonical_body(body: Option<&RequestBody>) -> String {
    match body {
        None => String::new(),
        // serde_json maps are ordered by key, so this is already canonical
        Some(RequestBody::Json(value)) => value.to_string(),
        Some(RequestBody::Form(fields)) => {
            let mut pairs: Vec<String> = fields
                .iter()
                .map(|(k, v)| encode_pairs(&[(k.clone(), v.clone())]))
                .collect();
            pairs.sort();
            pairs.join("&")
        }
        Some(RequestBody::EncodedForm(form)) => {
            let mut pairs: Vec<&str> = form.split('&').collect();
            pairs.sort_unstable();
            pairs.join("&")
        }
        Some(RequestBody::Raw(raw)) => raw.clone(),
    }
}
