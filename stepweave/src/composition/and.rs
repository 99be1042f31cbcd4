use super::{check_refs, entrypoints, upgrade};
use crate::context::StepContext;
use crate::errors::StepError;
use crate::interceptors::{continuation, priority, Interceptor, Next, StepOutput};
use crate::pipeline::Pipeline;
use std::sync::{Arc, Weak};

/// Runs referenced steps one after another against the same context, then
/// the continuation. Stops at the first aborting error.
#[derive(Debug)]
pub struct And {
    refs: Vec<String>,
}

impl And {
    /// Creates the sequence.
    #[must_use]
    pub fn new(refs: Vec<String>) -> Self {
        Self { refs }
    }

    async fn call(
        self: Arc<Self>,
        mut ctx: StepContext,
        next: Next,
        pipeline: Weak<Pipeline>,
    ) -> StepOutput {
        let pipeline = match upgrade(&pipeline) {
            Ok(pipeline) => pipeline,
            Err(err) => return (ctx, Err(err)),
        };
        let steps = match entrypoints(&pipeline, &self.refs) {
            Ok(steps) => steps,
            Err(err) => return (ctx, Err(err)),
        };

        for (_, entrypoint) in steps {
            let (returned, result) = entrypoint(ctx).await;
            ctx = returned;
            if let Err(err) = result {
                if err.abort_on_error() {
                    return (ctx, Err(err));
                }
            }
        }

        next(ctx).await
    }
}

impl Interceptor for And {
    fn name(&self) -> &'static str {
        "and"
    }

    fn priority(&self) -> i32 {
        priority::AND
    }

    fn references(&self) -> &[String] {
        &self.refs
    }

    fn bootstrap(self: Arc<Self>, pipeline: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        check_refs(pipeline, &self.refs)?;
        let pipeline = Arc::downgrade(pipeline);
        Ok(continuation(move |ctx| {
            Arc::clone(&self).call(ctx, Arc::clone(&next), Weak::clone(&pipeline))
        }))
    }
}
