//! Retry logic.
//!
//! - Network-class failures are retried for any method with a replayable body
//! - `5xx` responses are retried only for idempotent methods
//!   (`GET`, `HEAD`, `PUT`, `DELETE`, `OPTIONS`)
//! - `POST`/`PATCH` server errors are never retried
//! - One-shot stream bodies are never retried

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use tracing::debug;

use super::{Transport, calculate_backoff};
use crate::error::Result;
use crate::request::RequestDescriptor;
use crate::response::Response;

/// Whether repeating `method` has no additional side effects.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

/// Retry budget and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Whether `outcome` of a call to `request` deserves another attempt.
    pub fn should_retry(&self, request: &RequestDescriptor, outcome: &Result<Response>) -> bool {
        if !request.body().is_replayable() {
            return false;
        }
        match outcome {
            Err(error) => error.is_retryable_network(),
            Ok(response) => response.status().is_server_error() && is_idempotent(request.method()),
        }
    }
}

/// Outcome of a retried call.
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<Response>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Wraps a [`Transport`] with bounded retries and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        RetryingTransport { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `request`, retrying per policy.
    ///
    /// The request's own retry budget, when set, replaces the policy's. A
    /// final `5xx` is returned as a response, not as an error.
    pub async fn execute(&self, request: &RequestDescriptor) -> Attempted {
        let budget = request.directives().retries.unwrap_or(self.policy.retries);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.inner.send(request).await;
            let retry = attempts - 1;
            if retry >= budget || !self.policy.should_retry(request, &result) {
                return Attempted { result, attempts };
            }

            let delay = calculate_backoff(retry + 1, self.policy.base_delay, self.policy.max_delay);
            match &result {
                Err(error) => debug!(attempt = attempts, ?delay, %error, "retrying after network error"),
                Ok(response) => debug!(attempt = attempts, ?delay, status = %response.status(), "retrying after server error"),
            }
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response> {
        self.execute(request).await.result
    }
}
