//! Onion-model stage executor.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage receives the
//! call context and a [`Next`] continuation: code before `next.run(ctx)` runs
//! on the way in, code after it runs on the way out, and a stage that never
//! calls `next` short-circuits everything below it.
//!
//! ```
//! use async_trait::async_trait;
//! use courier::{CallContext, Next, Pipeline, RequestDescriptor, Result, Stage};
//! use http::Method;
//! use std::sync::Arc;
//!
//! struct Noop;
//!
//! #[async_trait]
//! impl Stage for Noop {
//!     fn name(&self) -> &'static str {
//!         "noop"
//!     }
//!
//!     async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()> {
//!         next.run(ctx).await
//!     }
//! }
//!
//! # tokio_test(async {
//! let pipeline = Pipeline::new(vec![Arc::new(Noop)]);
//! let mut ctx = CallContext::new(RequestDescriptor::new(Method::GET, "/"));
//! pipeline.run(&mut ctx).await.unwrap();
//! assert!(ctx.timings().contains_key("noop"));
//! # });
//! # fn tokio_test<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;

/// One middleware unit.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name, used as the timing key.
    fn name(&self) -> &'static str;

    /// Handles the call, usually by invoking `next` somewhere in between.
    async fn handle(&self, ctx: &mut CallContext, next: Next) -> Result<()>;
}

/// Continuation over the remaining stages.
///
/// Owned and `'static`, so a stage may move it into a spawned task.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Stage>]>,
    position: usize,
}

impl Next {
    /// Runs the remaining stages. Past the last stage this is a no-op.
    pub async fn run(self, ctx: &mut CallContext) -> Result<()> {
        let Some(stage) = self.stages.get(self.position).cloned() else {
            return Ok(());
        };
        let next = Next {
            stages: self.stages,
            position: self.position + 1,
        };
        let started = Instant::now();
        let result = stage.handle(ctx, next).await;
        ctx.record_timing(stage.name(), started.elapsed());
        result
    }

    /// Number of stages still to run.
    pub fn remaining(&self) -> usize {
        self.stages.len().saturating_sub(self.position)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Composed, stateless chain of stages. Cheap to clone and share.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Pipeline {
            stages: stages.into(),
        }
    }

    /// Runs every stage over `ctx`. Errors propagate unchanged.
    pub async fn run(&self, ctx: &mut CallContext) -> Result<()> {
        Next {
            stages: self.stages.clone(),
            position: 0,
        }
        .run(ctx)
        .await
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}
