//! Opt-in handling of `404 Not Found`.
//!
//! [`AcceptNotFoundStage`] runs first and lets a 404 travel back through the
//! cache and metrics stages as an ordinary response. [`NotFoundFallbackStage`]
//! sits right outside them and turns it into an empty success whose body is
//! [`ResponseBody::Null`]. Callers that did not opt in get
//! [`Error::Protocol`] as usual.

use async_trait::async_trait;
use http::StatusCode;
use tracing::trace;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::pipeline::{Next, Stage};
use crate::response::{Response, ResponseBody};

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptNotFoundStage;

#[async_trait]
impl Stage for AcceptNotFoundStage {
    fn name(&self) -> &'static str {
        "accept_not_found"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        if ctx.request().directives().accept_not_found {
            ctx.accept_status(StatusCode::NOT_FOUND);
        }
        next.run(ctx).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundFallbackStage;

#[async_trait]
impl Stage for NotFoundFallbackStage {
    fn name(&self) -> &'static str {
        "not_found_fallback"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        let opted_in = ctx.request().directives().accept_not_found;

        let response = match next.run(ctx).await {
            Ok(()) => match ctx.take_response() {
                Some(response) => response,
                None => return Ok(()),
            },
            // A shared execution led by a caller without the opt-in.
            Err(Error::Protocol {
                status, headers, ..
            }) if opted_in && status == StatusCode::NOT_FOUND => {
                Response::new(status, headers, ResponseBody::Empty)
            }
            Err(error) => return Err(error),
        };

        let response = if opted_in && response.status() == StatusCode::NOT_FOUND {
            trace!(url = %ctx.request().url(), "not found converted to null");
            let mut response = response;
            response.set_body(ResponseBody::Null);
            response.cache_hit_mut().not_found = true;
            response
        } else {
            // A shared execution led by a caller with the opt-in.
            ctx.ensure_accepted(response).await?
        };
        ctx.set_response(response);
        Ok(())
    }
}
