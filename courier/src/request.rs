//! Outbound request model.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use courier_core::CacheType;
use futures::Stream;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::error::Result;

/// Caller supplied in-flight key function.
pub type InflightKeyFn = Arc<dyn Fn(&RequestDescriptor) -> String + Send + Sync>;

/// Streaming request payload.
pub type RequestStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + Sync>>;

/// How the caller wants the response body handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Buffered and decoded as JSON by the facade.
    #[default]
    Json,
    /// Buffered, returned as raw bytes.
    Buffer,
    /// Live body stream, consumed by the caller.
    Stream,
}

/// Request body.
#[derive(Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// One-shot stream. The first transport attempt takes it; the request
    /// is never replayed.
    Stream(StreamBody),
}

impl RequestBody {
    /// Whether the body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Stream(_))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(Bytes::from(text))
    }
}

/// Shared handle on a one-shot body stream.
#[derive(Clone)]
pub struct StreamBody(Arc<Mutex<Option<RequestStream>>>);

impl StreamBody {
    pub fn new(stream: RequestStream) -> Self {
        StreamBody(Arc::new(Mutex::new(Some(stream))))
    }

    /// Takes the stream. Returns `None` once it has been taken.
    pub fn take(&self) -> Option<RequestStream> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Per-request behavior switches, fixed before the pipeline starts.
#[derive(Clone, Default)]
pub struct Directives {
    /// Storage tier(s) the request may be cached in.
    pub cacheable: CacheType,
    /// Treat an upstream 404 as an empty successful response.
    pub accept_not_found: bool,
    /// Share one execution among concurrent identical calls.
    pub memoizable: bool,
    /// Minimum cache lifetime, overriding upstream freshness headers.
    pub force_max_age: Option<u64>,
    /// Retry budget replacing the transport's default.
    pub retries: Option<u32>,
    /// Overrides the in-flight key. Defaults to the cache key.
    pub inflight_key: Option<InflightKeyFn>,
}

impl fmt::Debug for Directives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directives")
            .field("cacheable", &self.cacheable)
            .field("accept_not_found", &self.accept_not_found)
            .field("memoizable", &self.memoizable)
            .field("force_max_age", &self.force_max_age)
            .field("retries", &self.retries)
            .field("inflight_key", &self.inflight_key.is_some())
            .finish()
    }
}

/// Everything needed to perform one outbound call.
///
/// Method, URL and query parameters are only settable while building; stages
/// see them read-only so keys derived from them stay valid for the whole run.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: Method,
    base_url: Option<String>,
    path: String,
    params: BTreeMap<String, String>,
    headers: HeaderMap,
    body: RequestBody,
    timeout: Option<Duration>,
    response_type: ResponseType,
    metric: Option<String>,
    directives: Directives,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestDescriptor {
            method,
            base_url: None,
            path: path.into(),
            params: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            response_type: ResponseType::default(),
            metric: None,
            directives: Directives::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets a header, replacing any earlier value for the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets all headers from `headers`, later entries winning.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type`.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)?;
        self.body = RequestBody::Bytes(Bytes::from(encoded));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    pub fn with_directives(mut self, directives: Directives) -> Self {
        self.directives = directives;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fully qualified target without the query string.
    ///
    /// An absolute `path` is used as is; otherwise base and path are joined
    /// with exactly one slash between them.
    pub fn url(&self) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return self.path.clone();
        }
        match &self.base_url {
            Some(base) if self.path.is_empty() => base.clone(),
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            ),
            None => self.path.clone(),
        }
    }

    /// Query parameters, sorted by name.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn metric(&self) -> Option<&str> {
        self.metric.as_deref()
    }

    pub fn directives(&self) -> &Directives {
        &self.directives
    }

    /// `GET` or `HEAD`: no side effects, eligible for caching and sharing.
    pub fn is_safe(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    pub(crate) fn fill_base_url(&mut self, base_url: &str) {
        if self.base_url.is_none() {
            self.base_url = Some(base_url.to_owned());
        }
    }

    pub(crate) fn fill_timeout(&mut self, timeout: Duration) {
        if self.timeout.is_none() {
            self.timeout = Some(timeout);
        }
    }
}
