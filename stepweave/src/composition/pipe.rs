use super::{check_refs, entrypoints, fan_in, upgrade};
use crate::cancellation::BranchGroup;
use crate::context::{pipe, OutputStream, StepContext};
use crate::errors::StepError;
use crate::interceptors::{continuation, priority, Interceptor, Next, StepOutput};
use crate::pipeline::{PipeSpec, Pipeline};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connects referenced steps stdout to stdin and runs them concurrently.
///
/// The last step keeps the parent's stdout and the first the parent's stdin.
/// With `tee`, the parent's stdout also receives the output of every other
/// step.
#[derive(Debug)]
pub struct Pipe {
    refs: Vec<String>,
    tee: bool,
}

impl Pipe {
    /// Creates the pipe.
    #[must_use]
    pub fn new(spec: PipeSpec) -> Self {
        Self {
            refs: spec.refs,
            tee: spec.tee,
        }
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
        let last = steps.len().saturating_sub(1);

        // No limit: a bounded group could park a writer whose reader never starts.
        let mut group = BranchGroup::new(&ctx.cancel, None);
        let mut upstream = None;
        for (index, (name, entrypoint)) in steps.into_iter().enumerate() {
            let mut branch = ctx.deep_copy();
            if let Some(reader) = upstream.take() {
                branch.stdio.stdin = Some(reader);
            }

            let mut writer: Option<OutputStream> = None;
            if index < last {
                let (w, r) = pipe(PIPE_CAPACITY);
                if !self.tee {
                    branch.stdio.stdout.clear();
                }
                branch.stdio.stdout.push(w.clone());
                writer = Some(w);
                upstream = Some(r);
            }

            group.spawn(name, move |token| async move {
                let output = entrypoint(branch.with_cancel(token)).await;
                if let Some(writer) = writer {
                    if let Err(err) = writer.shutdown().await {
                        warn!(error = %err, "failed to close pipe");
                    }
                }
                output
            });
        }
        debug!(steps = group.task_count(), "pipe started");

        let errors = fan_in(&mut group, true, |_, branch| ctx.merge(&branch)).await;

        match errors.into_iter().next() {
            Some(err) => (ctx, Err(err)),
            None => next(ctx).await,
        }
    }
}

impl Interceptor for Pipe {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn priority(&self) -> i32 {
        priority::PIPE
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
