//! Transport seam and its reqwest implementation
//!
//! This module handles the network side of a task:
//! - Turning a merged task into a transport request
//! - Caching HTTP clients per redirect/decompression/proxy/jar combination
//! - Classifying client errors into `TransportError`

use crate::task::{RequestBody, Task};
use crate::url::{encode_pairs, with_search_params};
use crate::TransportError;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect::Policy, Client, Method};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Maximum redirect hops followed when redirects are enabled
const MAX_REDIRECTS: usize = 10;

/// Everything the transport needs to perform one request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URI, query parameters already applied
    pub uri: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
    pub follow_redirect: bool,
    pub decompress: bool,
    pub proxy: Option<String>,
    pub cookie_jar: Option<Arc<Jar>>,
}

impl FetchRequest {
    /// Builds the request for `task` fetching `uri`
    ///
    /// A selected user agent overrides any `user-agent` header of the task.
    pub fn from_task(task: &Task, uri: &str, user_agent: Option<String>) -> Self {
        let request = &task.request;
        let mut headers = request.headers.clone().unwrap_or_default();
        if let Some(agent) = user_agent {
            headers.retain(|name, _| !name.eq_ignore_ascii_case("user-agent"));
            headers.insert("user-agent".to_string(), agent);
        }

        Self {
            uri: with_search_params(uri, request.search_params.as_deref()),
            method: request.method(),
            headers,
            body: request.body.clone(),
            timeout: request.timeout(),
            follow_redirect: request.follow_redirect(),
            decompress: request.decompress(),
            proxy: request.proxy.clone(),
            cookie_jar: request.cookie_jar.clone(),
        }
    }

    /// Value of the header `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response as returned by the transport, before encoding
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Final URL after redirects
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Synthetic response wrapping caller-supplied markup
    pub fn inline(content: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        Self {
            status: 200,
            url: String::new(),
            headers,
            body: content.into_bytes(),
        }
    }
}

/// Performs requests on behalf of the pipeline
///
/// Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<RawResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    follow_redirect: bool,
    decompress: bool,
    proxy: Option<String>,
    jar: Option<usize>,
}

/// [`Transport`] backed by reqwest
///
/// Clients are built lazily for each combination of client-level options
/// and reused afterwards.
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl ReqwestTransport {
    /// Creates the transport and its default client
    pub fn new() -> Result<Self, reqwest::Error> {
        let key = ClientKey {
            follow_redirect: false,
            decompress: true,
            proxy: None,
            jar: None,
        };
        let client = build_http_client(&key, None)?;

        let mut clients = HashMap::new();
        clients.insert(key, client);
        Ok(Self {
            clients: Mutex::new(clients),
        })
    }

    fn client_for(&self, request: &FetchRequest) -> Result<Client, TransportError> {
        let key = ClientKey {
            follow_redirect: request.follow_redirect,
            decompress: request.decompress,
            proxy: request.proxy.clone(),
            jar: request
                .cookie_jar
                .as_ref()
                .map(|jar| Arc::as_ptr(jar) as usize),
        };

        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(&key, request.cookie_jar.clone()).map_err(classify)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// Builds an HTTP client for one combination of client-level options
fn build_http_client(key: &ClientKey, jar: Option<Arc<Jar>>) -> Result<Client, reqwest::Error> {
    let redirect = if key.follow_redirect {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let mut builder = Client::builder()
        .redirect(redirect)
        .connect_timeout(Duration::from_secs(10))
        .gzip(key.decompress)
        .brotli(key.decompress);

    if let Some(proxy) = &key.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    if let Some(jar) = jar {
        builder = builder.cookie_provider(jar);
    }

    builder.build()
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Serializes a body and returns it with its default content type
fn encode_body(body: &RequestBody) -> Result<(Vec<u8>, Option<&'static str>), TransportError> {
    match body {
        RequestBody::Json(value) => serde_json::to_vec(value)
            .map(|bytes| (bytes, Some("application/json")))
            .map_err(|e| TransportError::InvalidRequest(e.to_string())),
        RequestBody::Form(fields) => Ok((
            encode_pairs(fields).into_bytes(),
            Some("application/x-www-form-urlencoded"),
        )),
        RequestBody::EncodedForm(form) => Ok((
            form.clone().into_bytes(),
            Some("application/x-www-form-urlencoded"),
        )),
        RequestBody::Raw(raw) => Ok((raw.clone().into_bytes(), None)),
    }
}

/// Maps a client error onto the transport error kinds
fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Http(error)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<RawResponse, TransportError> {
        let client = self.client_for(&request)?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("method '{}'", request.method)))?;

        let mut headers = header_map(&request.headers)?;
        let mut builder = client.request(method, &request.uri).timeout(request.timeout);

        if let Some(body) = &request.body {
            let (bytes, content_type) = encode_body(body)?;
            if let Some(content_type) = content_type {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
            }
            builder = builder.body(bytes);
        }

        tracing::trace!(
            "{} {} (ua: {:?})",
            request.method,
            request.uri,
            headers.get(USER_AGENT)
        );

        let response = builder.headers(headers).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(RawResponse {
            status,
            url,
            headers,
            body,
        })
    }
}
