use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, debug, debug_span};

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Stage};
use crate::request::RequestDescriptor;
use crate::transport::{Attempted, RetryingTransport, Transport};

/// Innermost stage: performs the network call.
///
/// The request timeout bounds all attempts together. Statuses outside
/// `2xx` that the context has not accepted become [`Error::Protocol`].
pub struct TransportStage {
    transport: RetryingTransport<Arc<dyn Transport>>,
}

impl TransportStage {
    pub fn new(transport: RetryingTransport<Arc<dyn Transport>>) -> Self {
        TransportStage { transport }
    }

    async fn send(&self, request: &RequestDescriptor) -> Result<Attempted> {
        match request.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.transport.execute(request))
                .await
                .map_err(|_| Error::Timeout { after: limit }),
            None => Ok(self.transport.execute(request).await),
        }
    }
}

#[async_trait]
impl Stage for TransportStage {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn handle(&self, ctx: &mut CallContext, _next: Next) -> Result<()> {
        let span = debug_span!(
            "http_request",
            method = %ctx.request().method(),
            url = %ctx.request().url()
        );
        let attempted = self.send(ctx.request()).instrument(span.clone()).await?;
        ctx.set_attempts(attempted.attempts);

        let response = attempted.result?;
        span.in_scope(|| {
            debug!(
                status = %response.status(),
                attempts = attempted.attempts,
                "upstream responded"
            )
        });
        let response = ctx.ensure_accepted(response).await?;
        ctx.set_response(response);
        Ok(())
    }
}
