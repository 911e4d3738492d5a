//! Client configuration, per-call options and request-scoped context.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use courier_backend::Backend;
use courier_core::CacheType;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::recorder::Recorder;
use crate::request::InflightKeyFn;
use crate::transport::RetryPolicy;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default host template for region-based root URLs.
pub const DEFAULT_REGION_HOST: &str = "http://{service}.{region}.internal";

/// Static configuration of one client.
///
/// ```
/// use courier::ClientConfig;
/// use std::time::Duration;
///
/// let config: ClientConfig = serde_json::from_str(r#"{
///     "name": "catalog",
///     "base_url": "http://catalog.internal",
///     "timeout": "3s",
///     "vary_headers": ["accept-language"]
/// }"#).unwrap();
///
/// assert_eq!(config.timeout, Duration::from_secs(3));
/// assert_eq!(config.retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Metric name used when a call does not set its own.
    pub name: String,
    pub base_url: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    pub default_headers: BTreeMap<String, String>,
    /// Request headers folded into the cache key.
    pub vary_headers: Vec<String>,
    /// How long an expired entry with an `ETag` is kept for revalidation.
    #[serde(with = "humantime_serde")]
    pub revalidation_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        ClientConfig {
            name: "courier".to_owned(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            retries: retry.retries,
            retry_base_delay: retry.base_delay,
            retry_max_delay: retry.max_delay,
            default_headers: BTreeMap::new(),
            vary_headers: Vec::new(),
            revalidation_window: Duration::from_secs(3600),
        }
    }
}

impl ClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
        }
    }

    /// Default headers, validated.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.default_headers.len());
        for (name, value) in &self.default_headers {
            headers.insert(header_name(name)?, header_value(name, value)?);
        }
        Ok(headers)
    }

    /// Vary header names, validated.
    pub fn vary_header_names(&self) -> Result<Vec<HeaderName>> {
        self.vary_headers.iter().map(|name| header_name(name)).collect()
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_str(name)
        .map_err(|_| Error::Configuration(format!("invalid header name `{name}`")))
}

pub(crate) fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Configuration(format!("invalid value for header `{name}`")))
}

/// Options recognized by every facade verb.
///
/// Unset fields fall back to the verb's defaults. See [`merge`](Self::merge)
/// for layering.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
    pub params: BTreeMap<String, String>,
    pub cacheable: Option<CacheType>,
    pub memoizable: Option<bool>,
    pub force_max_age: Option<u64>,
    pub null_if_not_found: Option<bool>,
    /// Retry budget for this call, replacing the client's.
    pub retries: Option<u32>,
    pub inflight_key: Option<InflightKeyFn>,
    pub metric: Option<String>,
    pub cancel: Option<CancelSignal>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn cacheable(mut self, cacheable: CacheType) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    pub fn memoizable(mut self, memoizable: bool) -> Self {
        self.memoizable = Some(memoizable);
        self
    }

    pub fn force_max_age(mut self, seconds: u64) -> Self {
        self.force_max_age = Some(seconds);
        self
    }

    pub fn null_if_not_found(mut self, enabled: bool) -> Self {
        self.null_if_not_found = Some(enabled);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn inflight_key<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&crate::RequestDescriptor) -> String + Send + Sync + 'static,
    {
        self.inflight_key = Some(Arc::new(key_fn));
        self
    }

    pub fn metric(mut self, name: impl Into<String>) -> Self {
        self.metric = Some(name.into());
        self
    }

    pub fn cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Layers `later` over `self`.
    ///
    /// Every field set in `later` wins; headers and params are merged key by
    /// key, `later` winning on conflicts.
    pub fn merge(mut self, later: RequestOptions) -> RequestOptions {
        for (name, value) in &later.headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self.params.extend(later.params);
        RequestOptions {
            timeout: later.timeout.or(self.timeout),
            headers: self.headers,
            params: self.params,
            cacheable: later.cacheable.or(self.cacheable),
            memoizable: later.memoizable.or(self.memoizable),
            force_max_age: later.force_max_age.or(self.force_max_age),
            null_if_not_found: later.null_if_not_found.or(self.null_if_not_found),
            retries: later.retries.or(self.retries),
            inflight_key: later.inflight_key.or(self.inflight_key),
            metric: later.metric.or(self.metric),
            cancel: later.cancel.or(self.cancel),
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("cacheable", &self.cacheable)
            .field("memoizable", &self.memoizable)
            .field("force_max_age", &self.force_max_age)
            .field("null_if_not_found", &self.null_if_not_found)
            .field("retries", &self.retries)
            .field("inflight_key", &self.inflight_key.is_some())
            .field("metric", &self.metric)
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Scheme of the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    Bearer,
    Token,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Bearer => "bearer",
            AuthType::Token => "token",
        }
    }
}

/// Request-scoped identity and collaborators.
#[derive(Clone, Default)]
pub struct IoContext {
    pub account: String,
    pub workspace: String,
    pub auth_token: Option<String>,
    pub region: Option<String>,
    pub user_agent: String,
    pub recorder: Option<Arc<dyn Recorder>>,
    pub cancel: Option<CancelSignal>,
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("account", &self.account)
            .field("workspace", &self.workspace)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("user_agent", &self.user_agent)
            .field("recorder", &self.recorder.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Per-instance settings and shared collaborators.
#[derive(Clone)]
pub struct InstanceOptions {
    pub name: Option<String>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Absolute URL or bare host of the upstream.
    pub endpoint: Option<String>,
    pub memory_cache: Option<Arc<dyn Backend>>,
    pub disk_cache: Option<Arc<dyn Backend>>,
    pub metrics: Option<Arc<dyn MetricsSink>>,
    /// `{service}` and `{region}` are substituted.
    pub region_host_template: String,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        InstanceOptions {
            name: None,
            timeout: None,
            retries: None,
            endpoint: None,
            memory_cache: None,
            disk_cache: None,
            metrics: None,
            region_host_template: DEFAULT_REGION_HOST.to_owned(),
        }
    }
}

impl fmt::Debug for InstanceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceOptions")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("endpoint", &self.endpoint)
            .field("memory_cache", &self.memory_cache.as_ref().map(|c| c.label()))
            .field("disk_cache", &self.disk_cache.as_ref().map(|c| c.label()))
            .field("metrics", &self.metrics.is_some())
            .field("region_host_template", &self.region_host_template)
            .finish()
    }
}

/// Options of a client talking to a fixed endpoint with token auth.
#[derive(Clone, Debug, Default)]
pub struct LegacyOptions {
    pub auth_token: String,
    pub user_agent: String,
    pub instance: InstanceOptions,
}

/// Root URL of `service`: the explicit endpoint, else the region host.
pub fn root_url(service: &str, ctx: &IoContext, opts: &InstanceOptions) -> Result<String> {
    if let Some(endpoint) = opts.endpoint.as_deref().filter(|e| !e.is_empty()) {
        return Ok(absolute(endpoint));
    }
    if let Some(region) = ctx.region.as_deref().filter(|r| !r.is_empty()) {
        return Ok(opts
            .region_host_template
            .replace("{service}", service)
            .replace("{region}", region));
    }
    Err(Error::Configuration(
        "missing required context: either region or endpoint".into(),
    ))
}

/// Root URL followed by `/{account}/{workspace}`.
pub fn workspace_url(service: &str, ctx: &IoContext, opts: &InstanceOptions) -> Result<String> {
    if ctx.account.is_empty() || ctx.workspace.is_empty() {
        return Err(Error::Configuration(
            "missing required context: account and workspace".into(),
        ));
    }
    let root = root_url(service, ctx, opts)?;
    Ok(format!(
        "{}/{}/{}",
        root.trim_end_matches('/'),
        ctx.account,
        ctx.workspace
    ))
}

pub(crate) fn absolute(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_owned()
    } else {
        format!("http://{endpoint}")
    }
}
