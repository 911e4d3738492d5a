use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::metrics::{MetricValue, MetricsSink};
use crate::pipeline::{Next, Stage};

/// Reports the duration and outcome of calls that reach upstream.
///
/// Each call produces a duration sample and a count of the transport
/// attempts it made, under the same name and tags. Batches are named `http-client-{metric}`, where `metric` is the call's
/// own metric name or else the client name.
pub struct MetricsStage {
    sink: Arc<dyn MetricsSink>,
    client_name: String,
}

impl MetricsStage {
    pub fn new(sink: Arc<dyn MetricsSink>, client_name: impl Into<String>) -> Self {
        MetricsStage {
            sink,
            client_name: client_name.into(),
        }
    }
}

fn outcome(result: &Result<()>, ctx: &CallContext) -> String {
    match result {
        Ok(()) => ctx
            .response()
            .map(|response| response.status().as_u16().to_string())
            .unwrap_or_else(|| "none".to_owned()),
        Err(Error::Protocol { status, .. }) => status.as_u16().to_string(),
        Err(Error::Timeout { .. }) => "timeout".to_owned(),
        Err(Error::Cancelled) => "cancelled".to_owned(),
        Err(_) => "error".to_owned(),
    }
}

#[async_trait]
impl Stage for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        let started = Instant::now();
        let result = next.run(ctx).await;
        let elapsed = started.elapsed();

        let name = format!(
            "http-client-{}",
            ctx.request().metric().unwrap_or(&self.client_name)
        );
        let cache_hit = ctx.response().map(|r| r.cache_hit()).unwrap_or_default();
        let tags = [
            ("method", ctx.request().method().to_string()),
            ("status", outcome(&result, ctx)),
            ("inflight", cache_hit.inflight.to_string()),
            ("memoized", cache_hit.memoized.to_string()),
        ];
        self.sink.batch(&name, MetricValue::Duration(elapsed), &tags);
        self.sink
            .batch(&name, MetricValue::Count(u64::from(ctx.attempts())), &tags);

        result
    }
}
