use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;

use crate::context::CallContext;
use crate::error::Result;
use crate::pipeline::{Next, Stage};

/// Fills in what the caller left unset: base URL, headers and timeout.
///
/// Request headers always win over defaults.
#[derive(Debug, Clone)]
pub struct DefaultsStage {
    base_url: Option<String>,
    headers: HeaderMap,
    timeout: Duration,
}

impl DefaultsStage {
    pub fn new(base_url: Option<String>, headers: HeaderMap, timeout: Duration) -> Self {
        DefaultsStage {
            base_url,
            headers,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for DefaultsStage {
    fn name(&self) -> &'static str {
        "defaults"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        let request = ctx.request_mut();
        if let Some(base_url) = &self.base_url {
            request.fill_base_url(base_url);
        }
        for (name, value) in &self.headers {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }
        request.fill_timeout(self.timeout);

        next.run(ctx).await
    }
}
