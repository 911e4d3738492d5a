//! Cache read/write stage.
//!
//! One instance per store. The stage applies when the request's cacheable
//! class accepts the store's tier and the request is a non-streaming
//! `GET`/`HEAD`.
//!
//! - **read**: a fresh entry short-circuits the call. `force_max_age`
//!   replaces the stored TTL in the freshness comparison.
//! - **revalidate**: an expired entry with an `ETag` adds `If-None-Match`;
//!   a `304` answer serves the stored response and restarts its TTL.
//! - **write**: `2xx` responses with a positive TTL are stored. The TTL is
//!   `force_max_age`, else `s-maxage`, else `max-age`; `no-store`,
//!   `no-cache` and `private` disable storage unless forced.
//!
//! Store failures never fail the call: reads degrade to a miss and writes to
//! a no-op, both logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_backend::{Backend, CacheBackend};
use courier_core::{CacheKey, CacheType, CacheValue};
use http::header::{CACHE_CONTROL, ETAG, HeaderMap, HeaderName, HeaderValue, IF_NONE_MATCH};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::context::CallContext;
use crate::error::Result;
use crate::key::cache_key;
use crate::pipeline::{Next, Stage};
use crate::request::{RequestDescriptor, ResponseType};
use crate::response::{CacheSource, Response, ResponseBody};

/// Serialized form of a stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedResponse {
    #[serde(with = "status_code")]
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl CachedResponse {
    fn capture(response: &Response) -> Option<CachedResponse> {
        let body = match response.body() {
            ResponseBody::Bytes(bytes) => bytes.clone(),
            ResponseBody::Empty => Bytes::new(),
            ResponseBody::Null | ResponseBody::Stream(_) => return None,
        };
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_owned())))
            .collect();
        Some(CachedResponse {
            status: response.status(),
            headers,
            body,
        })
    }

    fn etag(&self) -> Option<HeaderValue> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(ETAG.as_str()))
            .and_then(|(_, value)| HeaderValue::from_str(value).ok())
    }

    fn into_response(self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        let body = if self.body.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Bytes(self.body)
        };
        Response::new(self.status, headers, body)
    }
}

/// Statuses are stored as their numeric code; an out-of-range code makes
/// the entry malformed.
mod status_code {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(deserializer)?;
        StatusCode::from_u16(code).map_err(de::Error::custom)
    }
}

/// Freshness lifetime in seconds announced by `Cache-Control`.
///
/// `None` when the response must not be stored or announces no lifetime.
///
/// ```
/// use courier::stages::freshness_lifetime;
/// use http::{HeaderMap, HeaderValue, header::CACHE_CONTROL};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=60, s-maxage=300"));
/// assert_eq!(freshness_lifetime(&headers), Some(300));
/// ```
pub fn freshness_lifetime(headers: &HeaderMap) -> Option<u64> {
    let mut max_age = None;
    let mut s_maxage = None;

    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(',') {
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };
            let seconds = || argument.and_then(|a| a.parse::<u64>().ok());
            match name.to_ascii_lowercase().as_str() {
                "no-store" | "no-cache" | "private" => return None,
                "max-age" => max_age = seconds(),
                "s-maxage" => s_maxage = seconds(),
                _ => {}
            }
        }
    }

    s_maxage.or(max_age).filter(|ttl| *ttl > 0)
}

fn source_of(tier: CacheType) -> CacheSource {
    match tier {
        CacheType::Disk => CacheSource::Disk,
        _ => CacheSource::Memory,
    }
}

/// Reads from and writes to one cache store.
pub struct CacheStage {
    backend: Arc<dyn Backend>,
    tier: CacheType,
    name: &'static str,
    vary_headers: Arc<[HeaderName]>,
    revalidation_window: Duration,
}

impl CacheStage {
    pub fn new(
        backend: Arc<dyn Backend>,
        vary_headers: Arc<[HeaderName]>,
        revalidation_window: Duration,
    ) -> Self {
        let tier = backend.tier();
        let name = match tier {
            CacheType::Disk => "cache.disk",
            _ => "cache.memory",
        };
        CacheStage {
            backend,
            tier,
            name,
            vary_headers,
            revalidation_window,
        }
    }

    fn applies(&self, request: &RequestDescriptor) -> bool {
        request.directives().cacheable.accepts(self.tier)
            && request.is_safe()
            && request.response_type() != ResponseType::Stream
    }

    async fn lookup(&self, key: &CacheKey) -> Option<CacheValue<CachedResponse>> {
        match self.backend.get::<CachedResponse>(key).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(backend = %self.backend.label(), %key, %error, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, cached: CachedResponse, ttl: u64) {
        let retain = match cached.etag() {
            Some(_) => Duration::from_secs(ttl).saturating_add(self.revalidation_window),
            None => Duration::from_secs(ttl),
        };
        let value = CacheValue::new(cached, ttl);
        match self.backend.set(key, &value, Some(retain)).await {
            Ok(()) => debug!(backend = %self.backend.label(), %key, ttl, "response cached"),
            Err(error) => {
                warn!(backend = %self.backend.label(), %key, %error, "cache write failed")
            }
        }
    }
}

#[async_trait]
impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        if !self.applies(ctx.request()) {
            return next.run(ctx).await;
        }

        let key = cache_key(ctx.request(), &self.vary_headers);
        let force_max_age = ctx.request().directives().force_max_age;

        let stale = match self.lookup(&key).await {
            Some(entry) if entry.is_fresh(force_max_age) => {
                debug!(backend = %self.backend.label(), %key, "cache hit");
                let mut response = entry.into_inner().into_response();
                response.cache_hit_mut().source = source_of(self.tier);
                ctx.set_response(response);
                return Ok(());
            }
            Some(entry) => entry.data().etag().map(|etag| (etag, entry)),
            None => None,
        };
        trace!(backend = %self.backend.label(), %key, revalidating = stale.is_some(), "cache miss");

        if let Some((etag, _)) = &stale {
            ctx.request_mut()
                .headers_mut()
                .insert(IF_NONE_MATCH, etag.clone());
            ctx.accept_status(StatusCode::NOT_MODIFIED);
        }

        next.run(ctx).await?;
        let Some(response) = ctx.take_response() else {
            return Ok(());
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some((_, entry)) = stale {
                let ttl = force_max_age
                    .or_else(|| freshness_lifetime(response.headers()))
                    .unwrap_or_else(|| entry.ttl_seconds());
                let cached = entry.into_inner();
                self.store(&key, cached.clone(), ttl).await;

                let mut revalidated = cached.into_response();
                let cache_hit = revalidated.cache_hit_mut();
                *cache_hit = response.cache_hit();
                cache_hit.source = source_of(self.tier);
                cache_hit.revalidated = true;
                debug!(backend = %self.backend.label(), %key, "cache entry revalidated");
                ctx.set_response(revalidated);
                return Ok(());
            }
        }

        if response.is_success() {
            let ttl = force_max_age
                .or_else(|| freshness_lifetime(response.headers()))
                .filter(|ttl| *ttl > 0);
            match (ttl, CachedResponse::capture(&response)) {
                (Some(ttl), Some(cached)) => self.store(&key, cached, ttl).await,
                _ => trace!(%key, "response not cacheable"),
            }
        }

        ctx.set_response(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use courier_moka::MokaBackend;
    use http::Method;

    use super::*;
    use crate::pipeline::Pipeline;
    use crate::request::Directives;

    fn cache_control(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn freshness_from_cache_control() {
        assert_eq!(freshness_lifetime(&cache_control("max-age=60")), Some(60));
        assert_eq!(freshness_lifetime(&cache_control("max-age=60, s-maxage=5")), Some(5));
        assert_eq!(freshness_lifetime(&cache_control("public, max-age=\"30\"")), Some(30));
        assert_eq!(freshness_lifetime(&cache_control("max-age=0")), None);
        assert_eq!(freshness_lifetime(&cache_control("no-store")), None);
        assert_eq!(freshness_lifetime(&cache_control("max-age=60, private")), None);
        assert_eq!(freshness_lifetime(&cache_control("No-Cache")), None);
        assert_eq!(freshness_lifetime(&HeaderMap::new()), None);
    }

    #[test]
    fn cached_response_keeps_status_headers_and_body() {
        let mut headers = cache_control("max-age=60");
        headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
        let response = Response::new(
            StatusCode::OK,
            headers,
            ResponseBody::Bytes(Bytes::from_static(b"{\"id\":1}")),
        );

        let cached = CachedResponse::capture(&response).unwrap();
        assert_eq!(cached.etag().unwrap(), "\"v1\"");

        let restored = cached.into_response();
        assert_eq!(restored.status(), StatusCode::OK);
        assert_eq!(restored.headers()[ETAG], "\"v1\"");
        assert!(matches!(restored.body(), ResponseBody::Bytes(b) if b.as_ref() == b"{\"id\":1}"));
    }

    /// Answers with a queue of canned responses and logs request headers.
    struct Upstream {
        replies: Mutex<Vec<(StatusCode, HeaderMap, &'static str)>>,
        seen: Mutex<Vec<HeaderMap>>,
    }

    impl Upstream {
        fn new(mut replies: Vec<(StatusCode, HeaderMap, &'static str)>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Upstream {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Stage for Arc<Upstream> {
        fn name(&self) -> &'static str {
            "upstream"
        }

        async fn handle(&self, ctx: &mut CallContext, _next: Next) -> Result<()> {
            self.seen.lock().unwrap().push(ctx.request().headers().clone());
            let (status, headers, body) = self.replies.lock().unwrap().pop().unwrap();
            let response = Response::new(status, headers, ResponseBody::Bytes(Bytes::from_static(body.as_bytes())));
            let response = ctx.ensure_accepted(response).await?;
            ctx.set_response(response);
            Ok(())
        }
    }

    fn call(force_max_age: Option<u64>) -> CallContext {
        let directives = Directives {
            cacheable: CacheType::Any,
            force_max_age,
            ..Directives::default()
        };
        CallContext::new(RequestDescriptor::new(Method::GET, "http://upstream/items").with_directives(directives))
    }

    fn setup(upstream: &Arc<Upstream>) -> (Pipeline, Arc<MokaBackend>) {
        let backend = Arc::new(MokaBackend::builder().max_entries(100).build());
        let stage = CacheStage::new(backend.clone(), Arc::from(Vec::new()), Duration::from_secs(3600));
        let pipeline = Pipeline::new(vec![Arc::new(stage), Arc::new(upstream.clone())]);
        (pipeline, backend)
    }

    #[tokio::test]
    async fn fresh_entry_short_circuits() {
        let upstream = Upstream::new(vec![(StatusCode::OK, cache_control("max-age=60"), "first")]);
        let (pipeline, _) = setup(&upstream);

        let mut first = call(None);
        pipeline.run(&mut first).await.unwrap();
        let mut second = call(None);
        pipeline.run(&mut second).await.unwrap();

        assert_eq!(upstream.calls(), 1);
        let response = second.take_response().unwrap();
        assert_eq!(response.cache_hit().source, CacheSource::Memory);
        assert_eq!(response.bytes().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn uncacheable_response_is_not_stored_unless_forced() {
        let upstream = Upstream::new(vec![
            (StatusCode::OK, cache_control("no-store"), "a"),
            (StatusCode::OK, cache_control("no-store"), "b"),
            (StatusCode::OK, cache_control("no-store"), "c"),
        ]);
        let (pipeline, _) = setup(&upstream);

        pipeline.run(&mut call(None)).await.unwrap();
        pipeline.run(&mut call(None)).await.unwrap();
        assert_eq!(upstream.calls(), 2);

        pipeline.run(&mut call(Some(60))).await.unwrap();
        pipeline.run(&mut call(Some(60))).await.unwrap();
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn expired_entry_with_etag_is_revalidated() {
        let upstream = Upstream::new(vec![(StatusCode::NOT_MODIFIED, cache_control("max-age=120"), "")]);
        let (pipeline, backend) = setup(&upstream);

        let mut headers = cache_control("max-age=10");
        headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
        let stored = CachedResponse::capture(&Response::new(
            StatusCode::OK,
            headers,
            ResponseBody::Bytes(Bytes::from_static(b"cached")),
        ))
        .unwrap();
        let key = cache_key(call(None).request(), &[]);
        let expired = CacheValue::with_stored_at(stored, Utc::now() - chrono::Duration::seconds(60), 10);
        backend.set(&key, &expired, None).await.unwrap();

        let mut ctx = call(None);
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(upstream.seen.lock().unwrap()[0][IF_NONE_MATCH], "\"v1\"");
        let response = ctx.take_response().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.cache_hit().revalidated);
        assert_eq!(response.bytes().await.unwrap(), "cached");

        let refreshed: CacheValue<CachedResponse> = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(refreshed.ttl_seconds(), 120);
        assert!(refreshed.is_fresh(None));
    }

    #[tokio::test]
    async fn entry_with_invalid_status_is_a_miss() {
        let upstream = Upstream::new(vec![(StatusCode::OK, cache_control("max-age=60"), "fresh")]);
        let (pipeline, backend) = setup(&upstream);
        let key = cache_key(call(None).request(), &[]);
        let corrupt = serde_json::json!({ "status": 1000, "headers": [], "body": [] });
        backend.set(&key, &CacheValue::new(corrupt, 60), None).await.unwrap();

        let mut ctx = call(None);
        pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(upstream.calls(), 1);
        let response = ctx.take_response().unwrap();
        assert_eq!(response.cache_hit().source, CacheSource::None);
        assert_eq!(response.bytes().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn non_get_requests_bypass_the_store() {
        let upstream = Upstream::new(vec![
            (StatusCode::OK, cache_control("max-age=60"), "a"),
            (StatusCode::OK, cache_control("max-age=60"), "b"),
        ]);
        let (pipeline, backend) = setup(&upstream);
        let post = || {
            let directives = Directives {
                cacheable: CacheType::Any,
                ..Directives::default()
            };
            CallContext::new(RequestDescriptor::new(Method::POST, "http://upstream/items").with_directives(directives))
        };

        pipeline.run(&mut post()).await.unwrap();
        pipeline.run(&mut post()).await.unwrap();

        assert_eq!(upstream.calls(), 2);
        backend.run_pending_tasks().await;
        assert_eq!(backend.entry_count(), 0);
    }
}
