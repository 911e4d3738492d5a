//! Response model and caller-facing result shapes.

use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Live response body stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Where the response came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Fetched from upstream.
    #[default]
    None,
    Memory,
    Disk,
}

/// Cache and deduplication annotations of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheHit {
    pub source: CacheSource,
    /// Another call with the same in-flight key was already running.
    pub inflight: bool,
    /// The response was copied from that other call.
    pub memoized: bool,
    /// An expired entry was confirmed by upstream with `304 Not Modified`.
    pub revalidated: bool,
    /// A 404 converted to an empty result.
    pub not_found: bool,
}

/// Response body.
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    /// Explicit absence, produced by the not-found fallback.
    Null,
    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ResponseBody::Null => f.write_str("Null"),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Upstream (or cached) response.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    cache_hit: CacheHit,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Response {
            status,
            headers,
            body,
            cache_hit: CacheHit::default(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn cache_hit(&self) -> CacheHit {
        self.cache_hit
    }

    pub fn cache_hit_mut(&mut self) -> &mut CacheHit {
        &mut self.cache_hit
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub(crate) fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// Copies a buffered response. Streams cannot be copied.
    pub fn try_clone(&self) -> Option<Response> {
        let body = match &self.body {
            ResponseBody::Empty => ResponseBody::Empty,
            ResponseBody::Bytes(bytes) => ResponseBody::Bytes(bytes.clone()),
            ResponseBody::Null => ResponseBody::Null,
            ResponseBody::Stream(_) => return None,
        };
        Some(Response {
            status: self.status,
            headers: self.headers.clone(),
            body,
            cache_hit: self.cache_hit,
        })
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, ResponseBody, CacheHit) {
        (self.status, self.headers, self.body, self.cache_hit)
    }

    /// Buffers the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        body_bytes(self.body).await
    }

    /// Buffers the body and decodes it as JSON.
    ///
    /// An empty or null body decodes from JSON `null`, so `Option<T>` and
    /// `()` targets accept it.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        decode_body(self.body).await
    }
}

pub(crate) async fn body_bytes(body: ResponseBody) -> Result<Bytes> {
    match body {
        ResponseBody::Empty | ResponseBody::Null => Ok(Bytes::new()),
        ResponseBody::Bytes(bytes) => Ok(bytes),
        ResponseBody::Stream(mut stream) => {
            let mut buffer = BytesMut::new();
            while let Some(chunk) = stream.next().await {
                buffer.extend_from_slice(&chunk?);
            }
            Ok(buffer.freeze())
        }
    }
}

pub(crate) async fn decode_body<T: DeserializeOwned>(body: ResponseBody) -> Result<T> {
    let bytes = body_bytes(body).await?;
    let slice: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    serde_json::from_slice(slice).map_err(Error::from)
}

/// Decoded body together with response metadata.
#[derive(Debug, Clone)]
pub struct IoResponse<T> {
    pub data: T,
    pub headers: HeaderMap,
    pub status: StatusCode,
    pub cache_hit: CacheHit,
}

/// Raw body bytes with headers.
#[derive(Debug, Clone)]
pub struct BufferResponse {
    pub data: Bytes,
    pub headers: HeaderMap,
}
