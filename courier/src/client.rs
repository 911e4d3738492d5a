//! Verb-shaped facade over the pipeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_backend::Backend;
use courier_core::CacheType;
use futures::stream;
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::config::{
    AuthType, ClientConfig, InstanceOptions, IoContext, LegacyOptions, RequestOptions, absolute,
    header_value, root_url, workspace_url,
};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::pipeline::{Pipeline, Stage};
use crate::recorder::Recorder;
use crate::request::{Directives, RequestDescriptor, ResponseType};
use crate::response::{
    BufferResponse, ByteStream, IoResponse, Response, ResponseBody, body_bytes, decode_body,
};
use crate::stages::{
    AcceptNotFoundStage, CacheStage, DefaultsStage, MemoizationStage, MetricsStage,
    NotFoundFallbackStage, RecorderStage, TransportStage,
};
use crate::transport::{ReqwestTransport, RetryingTransport, Transport};

/// Outbound HTTP client for one upstream.
///
/// Every verb builds a [`RequestDescriptor`] and runs it through the same
/// pipeline, assembled once at construction.
///
/// ```no_run
/// # async fn run() -> courier::Result<()> {
/// use courier::{HttpClient, RequestOptions};
///
/// let client = HttpClient::builder()
///     .base_url("http://catalog.internal")
///     .name("catalog")
///     .build()?;
///
/// let items: Vec<String> = client.get("/items", RequestOptions::new().param("page", "1")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    pipeline: Pipeline,
    name: String,
    cancel: Option<CancelSignal>,
}

struct VerbDefaults {
    cacheable: CacheType,
    response_type: ResponseType,
}

const CACHED: VerbDefaults = VerbDefaults {
    cacheable: CacheType::Any,
    response_type: ResponseType::Json,
};

const UNCACHED: VerbDefaults = VerbDefaults {
    cacheable: CacheType::None,
    response_type: ResponseType::Json,
};

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client for a workspace-scoped service: `{root}/{account}/{workspace}`.
    pub fn for_workspace(service: &str, ctx: &IoContext, opts: &InstanceOptions) -> Result<Self> {
        let base_url = workspace_url(service, ctx, opts)?;
        Self::from_context(base_url, service, ctx, opts)
    }

    /// Client for a service addressed at its root.
    pub fn for_root(service: &str, ctx: &IoContext, opts: &InstanceOptions) -> Result<Self> {
        let base_url = root_url(service, ctx, opts)?;
        Self::from_context(base_url, service, ctx, opts)
    }

    /// Client for a fixed endpoint authenticated with a plain token.
    pub fn for_legacy(endpoint: &str, opts: &LegacyOptions) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(Error::Configuration("missing required endpoint".into()));
        }
        let mut builder = Self::builder()
            .base_url(absolute(endpoint))
            .instance(&opts.instance)
            .auth(AuthType::Token, opts.auth_token.clone());
        if !opts.user_agent.is_empty() {
            builder = builder.user_agent(opts.user_agent.clone());
        }
        builder.build()
    }

    fn from_context(
        base_url: String,
        service: &str,
        ctx: &IoContext,
        opts: &InstanceOptions,
    ) -> Result<Self> {
        let mut builder = Self::builder()
            .base_url(base_url)
            .name(service)
            .instance(opts);
        if let Some(token) = &ctx.auth_token {
            builder = builder.auth(AuthType::Bearer, token.clone());
        }
        if !ctx.user_agent.is_empty() {
            builder = builder.user_agent(ctx.user_agent.clone());
        }
        if let Some(recorder) = &ctx.recorder {
            builder = builder.recorder(recorder.clone());
        }
        if let Some(cancel) = &ctx.cancel {
            builder = builder.cancel(cancel.clone());
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in execution order.
    pub fn stages(&self) -> Vec<&'static str> {
        self.pipeline.stage_names()
    }

    /// Decoded body. Cached in any tier and shared among concurrent callers
    /// unless `options` say otherwise.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        Ok(self.get_raw(path, options).await?.data)
    }

    /// Decoded body with status, headers and cache metadata.
    pub async fn get_raw<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<IoResponse<T>> {
        let (request, cancel) = self.prepare(Method::GET, path, options, CACHED);
        self.decode(request, cancel).await
    }

    /// Raw body bytes. Not cached or shared by default.
    pub async fn get_buffer(&self, path: &str, options: RequestOptions) -> Result<BufferResponse> {
        let defaults = VerbDefaults {
            response_type: ResponseType::Buffer,
            ..UNCACHED
        };
        let (request, cancel) = self.prepare(Method::GET, path, options, defaults);
        let (_, headers, body, _) = self.request(request, cancel).await?.into_parts();
        Ok(BufferResponse {
            data: body_bytes(body).await?,
            headers,
        })
    }

    /// Live body stream; the caller drives consumption.
    pub async fn get_stream(&self, path: &str, options: RequestOptions) -> Result<ByteStream> {
        let defaults = VerbDefaults {
            response_type: ResponseType::Stream,
            ..UNCACHED
        };
        let (request, cancel) = self.prepare(Method::GET, path, options, defaults);
        let (_, _, body, _) = self.request(request, cancel).await?.into_parts();
        Ok(match body {
            ResponseBody::Stream(stream) => stream,
            ResponseBody::Bytes(bytes) => Box::pin(stream::iter([Ok::<_, Error>(bytes)])),
            ResponseBody::Empty | ResponseBody::Null => Box::pin(stream::empty::<Result<Bytes>>()),
        })
    }

    pub async fn put<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        Ok(self.send_json(Method::PUT, path, body, options).await?.data)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        Ok(self.send_json(Method::POST, path, body, options).await?.data)
    }

    /// `POST` returning status, headers and cache metadata with the body.
    pub async fn post_raw<T, B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<IoResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.send_json(Method::POST, path, body, options).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        Ok(self.send_json(Method::PATCH, path, body, options).await?.data)
    }

    /// `DELETE`; the body is not decoded.
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<IoResponse<()>> {
        let (request, cancel) = self.prepare(Method::DELETE, path, options, UNCACHED);
        let (status, headers, _, cache_hit) = self.request(request, cancel).await?.into_parts();
        Ok(IoResponse {
            data: (),
            headers,
            status,
            cache_hit,
        })
    }

    /// Runs an arbitrary request through the pipeline.
    ///
    /// `cancel` falls back to the client's own signal. Firing it fails the
    /// call with [`Error::Cancelled`] and drops the in-progress work; a
    /// shared execution keeps running for its other subscribers.
    pub async fn request(
        &self,
        request: RequestDescriptor,
        cancel: Option<CancelSignal>,
    ) -> Result<Response> {
        let mut ctx = CallContext::new(request);
        let run = self.execute(&mut ctx);

        match cancel.or_else(|| self.cancel.clone()) {
            Some(signal) if signal.is_cancelled() => Err(Error::Cancelled),
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    debug!(client = %self.name, "call cancelled");
                    Err(Error::Cancelled)
                }
                result = run => result,
            },
            None => run.await,
        }
    }

    async fn execute(&self, ctx: &mut CallContext) -> Result<Response> {
        self.pipeline.run(ctx).await?;
        ctx.take_response()
            .ok_or_else(|| Error::Internal("pipeline finished without a response".into()))
    }

    async fn send_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<IoResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let (request, cancel) = self.prepare(method, path, options, UNCACHED);
        self.decode(request.with_json(body)?, cancel).await
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
        cancel: Option<CancelSignal>,
    ) -> Result<IoResponse<T>> {
        let (status, headers, body, cache_hit) = self.request(request, cancel).await?.into_parts();
        Ok(IoResponse {
            data: decode_body(body).await?,
            headers,
            status,
            cache_hit,
        })
    }

    fn prepare(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
        defaults: VerbDefaults,
    ) -> (RequestDescriptor, Option<CancelSignal>) {
        let directives = Directives {
            cacheable: options.cacheable.unwrap_or(defaults.cacheable),
            accept_not_found: options.null_if_not_found.unwrap_or(false),
            // The in-flight key ignores per-call headers.
            memoizable: options.memoizable.unwrap_or(false),
            force_max_age: options.force_max_age,
            retries: options.retries,
            inflight_key: options.inflight_key,
        };
        let mut request = RequestDescriptor::new(method, path)
            .with_params(options.params)
            .with_headers(&options.headers)
            .with_response_type(defaults.response_type)
            .with_directives(directives);
        if let Some(timeout) = options.timeout {
            request = request.with_timeout(timeout);
        }
        if let Some(metric) = options.metric {
            request = request.with_metric(metric);
        }
        (request, options.cancel)
    }
}

/// Builds an [`HttpClient`].
///
/// Optional collaborators add their stage only when supplied.
#[derive(Default)]
pub struct HttpClientBuilder {
    config: ClientConfig,
    headers: HeaderMap,
    auth: Option<(AuthType, String)>,
    user_agent: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    memory_cache: Option<Arc<dyn Backend>>,
    disk_cache: Option<Arc<dyn Backend>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    recorder: Option<Arc<dyn Recorder>>,
    cancel: Option<CancelSignal>,
}

impl HttpClientBuilder {
    /// Replaces the whole static configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Default header, sent unless the request sets its own.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn auth(mut self, kind: AuthType, token: impl Into<String>) -> Self {
        self.auth = Some((kind, token.into()));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Network transport. Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn memory_cache(mut self, backend: Arc<dyn Backend>) -> Self {
        self.memory_cache = Some(backend);
        self
    }

    pub fn disk_cache(mut self, backend: Arc<dyn Backend>) -> Self {
        self.disk_cache = Some(backend);
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Signal applied to calls that do not bring their own.
    pub fn cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Applies the instance settings that are set.
    pub fn instance(mut self, opts: &InstanceOptions) -> Self {
        if let Some(name) = &opts.name {
            self.config.name = name.clone();
        }
        if let Some(timeout) = opts.timeout {
            self.config.timeout = timeout;
        }
        if let Some(retries) = opts.retries {
            self.config.retries = retries;
        }
        if let Some(cache) = &opts.memory_cache {
            self.memory_cache = Some(cache.clone());
        }
        if let Some(cache) = &opts.disk_cache {
            self.disk_cache = Some(cache.clone());
        }
        if let Some(metrics) = &opts.metrics {
            self.metrics = Some(metrics.clone());
        }
        self
    }

    /// Validates headers and assembles the pipeline.
    pub fn build(self) -> Result<HttpClient> {
        let config = self.config;

        let mut headers = config.header_map()?;
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            headers.insert(USER_AGENT, header_value("user-agent", user_agent)?);
        }
        if let Some((kind, token)) = &self.auth {
            let mut value = header_value("authorization", &format!("{} {token}", kind.as_str()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let vary_headers: Arc<[HeaderName]> = config.vary_header_names()?.into();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let mut stages: Vec<Arc<dyn Stage>> = vec![Arc::new(DefaultsStage::new(
            config.base_url.clone(),
            headers,
            config.timeout,
        ))];
        if let Some(recorder) = self.recorder {
            stages.push(Arc::new(RecorderStage::new(recorder)));
        }
        stages.push(Arc::new(AcceptNotFoundStage));
        for backend in [self.memory_cache, self.disk_cache].into_iter().flatten() {
            stages.push(Arc::new(CacheStage::new(
                backend,
                vary_headers.clone(),
                config.revalidation_window,
            )));
        }
        stages.push(Arc::new(NotFoundFallbackStage));
        if let Some(sink) = self.metrics {
            stages.push(Arc::new(MetricsStage::new(sink, config.name.clone())));
        }
        stages.push(Arc::new(MemoizationStage::new(vary_headers)));
        stages.push(Arc::new(TransportStage::new(RetryingTransport::new(
            transport,
            config.retry_policy(),
        ))));

        let pipeline = Pipeline::new(stages);
        debug!(client = %config.name, stages = ?pipeline.stage_names(), "http client built");
        Ok(HttpClient {
            pipeline,
            name: config.name,
            cancel: self.cancel,
        })
    }
}
