use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;
use crate::pipeline::{Next, Stage};
use crate::recorder::Recorder;

/// Passes every successful call's final request/response pair to a [`Recorder`].
pub struct RecorderStage {
    recorder: Arc<dyn Recorder>,
}

impl RecorderStage {
    pub fn new(recorder: Arc<dyn Recorder>) -> Self {
        RecorderStage { recorder }
    }
}

#[async_trait]
impl Stage for RecorderStage {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
        next.run(ctx).await?;
        if let Some(response) = ctx.response() {
            self.recorder.record(ctx.request(), response);
        }
        Ok(())
    }
}
