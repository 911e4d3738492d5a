//! Per-call state flowing through the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use http::StatusCode;

use crate::error::{Error, Result};
use crate::request::RequestDescriptor;
use crate::response::{Response, ResponseBody, body_bytes};

/// The unit of work of one pipeline run.
///
/// Owned by exactly one run. The deduplicator never shares it: it forks a
/// child context for the shared execution and copies the response back.
#[derive(Debug)]
pub struct CallContext {
    request: RequestDescriptor,
    response: Option<Response>,
    accepted: Vec<StatusCode>,
    timings: BTreeMap<&'static str, u64>,
    attempts: u32,
}

impl CallContext {
    pub fn new(request: RequestDescriptor) -> Self {
        CallContext {
            request,
            response: None,
            accepted: Vec::new(),
            timings: BTreeMap::new(),
            attempts: 0,
        }
    }

    pub fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut RequestDescriptor {
        &mut self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Lets a non-2xx status through the transport as a normal response.
    pub fn accept_status(&mut self, status: StatusCode) {
        if !self.accepted.contains(&status) {
            self.accepted.push(status);
        }
    }

    /// `2xx`, or explicitly accepted.
    pub fn is_accepted(&self, status: StatusCode) -> bool {
        status.is_success() || self.accepted.contains(&status)
    }

    /// Turns an unaccepted response into a protocol error.
    ///
    /// The returned future does not borrow the context.
    pub(crate) fn ensure_accepted(
        &self,
        response: Response,
    ) -> impl Future<Output = Result<Response>> + Send + use<> {
        let accepted = self.is_accepted(response.status());
        async move {
            if accepted {
                return Ok(response);
            }
            let (status, headers, body, _) = response.into_parts();
            let body = match body {
                ResponseBody::Stream(_) => bytes::Bytes::new(),
                other => body_bytes(other).await?,
            };
            Err(Error::protocol(status, headers, body))
        }
    }

    /// Inclusive time spent in each stage, in nanoseconds.
    pub fn timings(&self) -> &BTreeMap<&'static str, u64> {
        &self.timings
    }

    pub fn record_timing(&mut self, stage: &'static str, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.timings.insert(stage, nanos);
    }

    /// Transport attempts made for this call.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    /// Fresh context for the same request, keeping accepted statuses.
    pub(crate) fn fork(&self) -> CallContext {
        CallContext {
            request: self.request.clone(),
            response: None,
            accepted: self.accepted.clone(),
            timings: BTreeMap::new(),
            attempts: 0,
        }
    }

    /// Copies timings and attempts recorded by a forked context.
    pub(crate) fn absorb(&mut self, timings: &BTreeMap<&'static str, u64>, attempts: u32) {
        self.timings
            .extend(timings.iter().map(|(stage, nanos)| (*stage, *nanos)));
        self.attempts = attempts;
    }
}
