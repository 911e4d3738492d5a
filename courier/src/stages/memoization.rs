use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, StatusCode};
use tracing::debug;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::inflight::{InflightMap, Role};
use crate::key::inflight_key;
use crate::pipeline::{Next, Stage};
use crate::request::{RequestDescriptor, ResponseType};
use crate::response::{Response, ResponseBody};

/// Copy of a finished execution handed to every subscriber.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
    timings: BTreeMap<&'static str, u64>,
    attempts: u32,
}

impl Snapshot {
    fn capture(mut ctx: CallContext) -> Result<Snapshot> {
        let response = ctx
            .take_response()
            .ok_or_else(|| Error::Internal("shared execution produced no response".into()))?;
        let (status, headers, body, _) = response.into_parts();
        let body = match body {
            ResponseBody::Empty | ResponseBody::Null => None,
            ResponseBody::Bytes(bytes) => Some(bytes),
            ResponseBody::Stream(_) => {
                return Err(Error::Internal("stream responses cannot be shared".into()));
            }
        };
        Ok(Snapshot {
            status,
            headers,
            body,
            timings: ctx.timings().clone(),
            attempts: ctx.attempts(),
        })
    }

    fn into_response(self) -> Response {
        let body = match self.body {
            Some(bytes) => ResponseBody::Bytes(bytes),
            None => ResponseBody::Empty,
        };
        Response::new(self.status, self.headers, body)
    }
}

/// Shares one downstream execution among concurrent identical calls.
///
/// Applies to memoizable, cacheable `GET`/`HEAD` calls that do not stream
/// their response. The leader's request governs the shared execution,
/// including its timeout; each joiner bounds its own wait by its timeout.
#[derive(Default)]
pub struct MemoizationStage {
    inflight: InflightMap<Snapshot>,
    vary_headers: Arc<[HeaderName]>,
}

impl MemoizationStage {
    pub fn new(vary_headers: Arc<[HeaderName]>) -> Self {
        MemoizationStage {
            inflight: InflightMap::new(),
            vary_headers,
        }
    }

    /// Executions currently shared.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    fn applies(request: &RequestDescriptor) -> bool {
        let directives = request.directives();
        directives.memoizable
            && directives.cacheable.is_cacheable()
            && request.is_safe()
            && request.response_type() != ResponseType::Stream
    }
}

#[async_trait]
impl Stage for MemoizationStage {
    fn name(&self) -> &'static str {
        "memoization"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        if !Self::applies(ctx.request()) {
            return next.run(ctx).await;
        }

        let key = inflight_key(ctx.request(), &self.vary_headers);
        let child = ctx.fork();
        let wait = ctx.request().timeout();

        let (role, result) = self
            .inflight
            .run(key.clone(), wait, move || async move {
                let mut child = child;
                next.run(&mut child).await?;
                Snapshot::capture(child)
            })
            .await;
        let snapshot = result?;

        let response = match role {
            Role::Leader => {
                ctx.absorb(&snapshot.timings, snapshot.attempts);
                snapshot.into_response()
            }
            Role::Joiner => {
                debug!(%key, "memoized response from in-flight request");
                let mut response = snapshot.into_response();
                let cache_hit = response.cache_hit_mut();
                cache_hit.inflight = true;
                cache_hit.memoized = true;
                ctx.ensure_accepted(response).await?
            }
        };
        ctx.set_response(response);
        Ok(())
    }
}
