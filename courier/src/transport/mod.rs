//! Network execution.
//!
//! [`Transport`] is the seam between the pipeline and the HTTP stack.
//! [`ReqwestTransport`] is the production implementation and
//! [`RetryingTransport`] wraps any transport with bounded retries.

mod backoff;
mod retry;

pub use backoff::calculate_backoff;
pub use retry::{Attempted, RetryPolicy, RetryingTransport, is_idempotent};

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect;

use crate::error::{Error, Result};
use crate::request::{RequestBody, RequestDescriptor, ResponseType};
use crate::response::{Response, ResponseBody};

/// Performs one network call.
///
/// Any status code is a successful send; classification of statuses is left
/// to the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response> {
        (**self).send(request).await
    }
}

/// [`Transport`] over a `reqwest::Client` that never follows redirects.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(ReqwestTransport { client })
    }

    /// Uses a preconfigured client as is.
    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone());
        if !request.params().is_empty() {
            builder = builder.query(request.params());
        }
        builder = match request.body() {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
            RequestBody::Stream(stream) => {
                let stream = stream
                    .take()
                    .ok_or_else(|| Error::Internal("request body stream already consumed".into()))?;
                builder.body(reqwest::Body::wrap_stream(stream))
            }
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        let body = if request.response_type() == ResponseType::Stream && status.is_success() {
            ResponseBody::Stream(Box::pin(
                response.bytes_stream().map(|chunk| chunk.map_err(Error::from)),
            ))
        } else {
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                ResponseBody::Empty
            } else {
                ResponseBody::Bytes(bytes)
            }
        };

        Ok(Response::new(status, headers, body))
    }
}
