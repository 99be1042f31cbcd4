use super::{check_refs, entrypoints, fan_in, upgrade};
use crate::cancellation::BranchGroup;
use crate::context::StepContext;
use crate::errors::StepError;
use crate::interceptors::{continuation, priority, Interceptor, Next, StepOutput};
use crate::pipeline::{ConcurrentSpec, Pipeline};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Runs referenced steps as concurrent branches, each on a deep copy of the
/// context, and merges every branch back before calling the continuation.
#[derive(Debug)]
pub struct Concurrent {
    refs: Vec<String>,
    fail_fast: bool,
    max_concurrent: Option<usize>,
}

impl Concurrent {
    /// Creates the fan-out. [`ConcurrentSpec::max_concurrent`] overrides
    /// `default_limit`.
    #[must_use]
    pub fn new(spec: ConcurrentSpec, default_limit: Option<usize>) -> Self {
        Self {
            refs: spec.refs,
            fail_fast: spec.fail_fast,
            max_concurrent: spec.max_concurrent.or(default_limit),
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

        let mut group = BranchGroup::new(&ctx.cancel, self.max_concurrent);
        for (name, entrypoint) in steps {
            let branch = ctx.deep_copy();
            group.spawn(name, move |token| entrypoint(branch.with_cancel(token)));
        }
        debug!(branches = group.task_count(), "concurrent branches started");

        let errors = fan_in(&mut group, self.fail_fast, |_, branch| ctx.merge(&branch)).await;

        match StepError::join(errors) {
            Some(err) => (ctx, Err(err)),
            None => next(ctx).await,
        }
    }
}

impl Interceptor for Concurrent {
    fn name(&self) -> &'static str {
        "concurrent"
    }

    fn priority(&self) -> i32 {
        priority::CONCURRENT
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptors::InterceptorChain;
    use crate::testing::{pipeline_of, FnInterceptor};
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use std::time::Duration;

    fn delayed_env(key: &'static str) -> InterceptorChain {
        InterceptorChain::new().with(Arc::new(FnInterceptor::new(
            move |mut ctx: StepContext| async move {
                let delay = rand::thread_rng().gen_range(0..20);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                ctx.envs.insert(key.into(), "1".into());
                (ctx, Ok(()))
            },
        )))
    }

    fn fan_out(spec: ConcurrentSpec) -> InterceptorChain {
        InterceptorChain::new().with(Arc::new(Concurrent::new(spec, None)))
    }

    #[tokio::test]
    async fn test_fan_in_merges_all_branches() {
        for _ in 0..5 {
            let pipeline = pipeline_of([
                ("all", fan_out(ConcurrentSpec::new(["a", "b", "c"]))),
                ("a", delayed_env("A")),
                ("b", delayed_env("B")),
                ("c", delayed_env("C")),
            ]);

            let next = pipeline.step("all").unwrap().entrypoint().unwrap();
            let (ctx, result) = next(StepContext::new("/tmp")).await;
            result.unwrap();

            let mut keys: Vec<_> = ctx.envs.keys().cloned().collect();
            keys.sort();
            assert_eq!(keys, vec!["A", "B", "C"]);
        }
    }

    #[tokio::test]
    async fn test_branch_errors_are_joined() {
        let pipeline = pipeline_of([
            ("all", fan_out(ConcurrentSpec::new(["ok", "skip", "bad"]))),
            ("ok", delayed_env("OK")),
            (
                "skip",
                InterceptorChain::new()
                    .with(Arc::new(FnInterceptor::failing(StepError::ConditionFalse))),
            ),
            (
                "bad",
                InterceptorChain::new().with(Arc::new(FnInterceptor::failing(StepError::Timeout))),
            ),
        ]);

        let next = pipeline.step("all").unwrap().entrypoint().unwrap();
        let (ctx, result) = next(StepContext::new("/tmp")).await;

        assert!(matches!(result, Err(StepError::Timeout)));
        assert_eq!(ctx.envs["OK"], "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_and_drains() {
        let slow = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            let cancel = Arc::clone(&ctx.cancel);
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(3600)) => (ctx, Ok(())),
                () = cancel.cancelled() => (ctx, Err(StepError::Cancelled("stopped".into()))),
            }
        }));
        let pipeline = pipeline_of([
            ("all", fan_out(ConcurrentSpec::new(["slow", "bad"]).fail_fast())),
            ("slow", InterceptorChain::new().with(slow.clone())),
            (
                "bad",
                InterceptorChain::new().with(Arc::new(FnInterceptor::failing(StepError::Timeout))),
            ),
        ]);

        let next = pipeline.step("all").unwrap().entrypoint().unwrap();
        let started = tokio::time::Instant::now();
        let (ctx, result) = next(StepContext::new("/tmp")).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3600));
        assert_eq!(slow.calls(), 1);
        assert!(!ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_branches() {
        let pipeline = pipeline_of([
            ("all", fan_out(ConcurrentSpec::new(["wait"]))),
            (
                "wait",
                InterceptorChain::new().with(Arc::new(FnInterceptor::new(
                    |ctx: StepContext| async move {
                        ctx.cancel.cancelled().await;
                        (ctx, Err(StepError::Cancelled("parent".into())))
                    },
                ))),
            ),
        ]);

        let ctx = StepContext::new("/tmp");
        let cancel = Arc::clone(&ctx.cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel("shutdown");
        });

        let next = pipeline.step("all").unwrap().entrypoint().unwrap();
        let (_, result) = next(ctx).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
