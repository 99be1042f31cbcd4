use super::{check_refs, upgrade};
use crate::context::StepContext;
use crate::errors::StepError;
use crate::interceptors::{continuation, priority, Interceptor, Next, StepOutput};
use crate::pipeline::Pipeline;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Runs dependencies missing from the ledger before the continuation.
///
/// Each dependency runs in an isolated context and its result is merged back
/// with the caller's inputs left untouched. Runs are single-flight per run
/// scope, so concurrent branches needing the same step share one execution.
#[derive(Debug)]
pub struct Needs {
    refs: Vec<String>,
}

impl Needs {
    /// Creates the dependency list.
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
        for name in &self.refs {
            if ctx.steps.get(name).is_some_and(|entry| entry.is_completed()) {
                continue;
            }

            let entrypoint = match pipeline.step(name).and_then(|step| step.entrypoint()) {
                Ok(entrypoint) => entrypoint,
                Err(err) => return (ctx, Err(err)),
            };

            let isolated = ctx.isolated();
            let scope = Arc::clone(&ctx.scope);
            let (delta, result) = scope
                .run_once(name, || async move {
                    debug!(step = %name, "running dependency");
                    let (done, result) = entrypoint(isolated).await;
                    (done.delta(), result)
                })
                .await;

            let inputs = ctx.inputs.clone();
            ctx.merge_delta(&delta);
            ctx.inputs = inputs;

            if let Err(err) = result {
                if err.abort_on_error() {
                    return (ctx, Err(err));
                }
            }
        }

        next(ctx).await
    }
}

impl Interceptor for Needs {
    fn name(&self) -> &'static str {
        "needs"
    }

    fn priority(&self) -> i32 {
        priority::NEEDS
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
    use crate::composition::Concurrent;
    use crate::context::{ParamValue, StepResult};
    use crate::interceptors::{InterceptorChain, Ledger};
    use crate::pipeline::ConcurrentSpec;
    use crate::testing::{pipeline_of, FnInterceptor};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn needs(refs: &[&str], body: Arc<FnInterceptor>) -> InterceptorChain {
        InterceptorChain::new()
            .with(Arc::new(Needs::new(refs.iter().map(|r| (*r).to_string()).collect())))
            .with(body)
    }

    fn setup_step(body: Arc<FnInterceptor>) -> InterceptorChain {
        InterceptorChain::new()
            .with(Arc::new(Ledger::new("setup")))
            .with(body)
    }

    #[tokio::test]
    async fn test_dependency_runs_and_merges() {
        let dir = TempDir::new().unwrap();
        let setup = Arc::new(FnInterceptor::new(|mut ctx: StepContext| async move {
            ctx.envs.insert("SETUP".into(), "done".into());
            ctx.inputs.insert("who".into(), ParamValue::string("setup"));
            (ctx, Ok(()))
        }));
        let body = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            assert_eq!(ctx.envs["SETUP"], "done");
            (ctx, Ok(()))
        }));
        let pipeline = pipeline_of([
            ("build", needs(&["setup"], body.clone())),
            ("setup", setup_step(setup.clone())),
        ]);

        let mut ctx = StepContext::new(dir.path());
        ctx.inputs.insert("who".into(), ParamValue::string("caller"));
        let next = pipeline.step("build").unwrap().entrypoint().unwrap();
        let (ctx, result) = next(ctx).await;
        result.unwrap();

        assert_eq!(setup.calls(), 1);
        assert_eq!(body.calls(), 1);
        assert!(ctx.steps["setup"].is_completed());
        assert_eq!(ctx.inputs["who"], ParamValue::string("caller"));
    }

    #[tokio::test]
    async fn test_completed_dependency_is_not_rerun() {
        let setup = Arc::new(FnInterceptor::set_env("SETUP", "done"));
        let pipeline = pipeline_of([
            ("build", needs(&["setup"], Arc::new(FnInterceptor::set_env("B", "1")))),
            ("setup", InterceptorChain::new().with(setup.clone())),
        ]);

        let mut done = StepResult::started();
        done.seal(&Ok(()));
        let mut ctx = StepContext::new("/tmp");
        ctx.steps.insert("setup".into(), done);

        let next = pipeline.step("build").unwrap().entrypoint().unwrap();
        next(ctx).await.1.unwrap();
        assert_eq!(setup.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_branches_share_one_run() {
        let dir = TempDir::new().unwrap();
        let setup = Arc::new(FnInterceptor::new(|mut ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.envs.insert("SETUP".into(), "done".into());
            (ctx, Ok(()))
        }));
        let pipeline = pipeline_of([
            (
                "all",
                InterceptorChain::new()
                    .with(Arc::new(Concurrent::new(ConcurrentSpec::new(["a", "b"]), None))),
            ),
            ("a", needs(&["setup"], Arc::new(FnInterceptor::set_env("A", "1")))),
            ("b", needs(&["setup"], Arc::new(FnInterceptor::set_env("B", "1")))),
            ("setup", setup_step(setup.clone())),
        ]);

        let next = pipeline.step("all").unwrap().entrypoint().unwrap();
        let (ctx, result) = next(StepContext::new(dir.path())).await;
        result.unwrap();

        assert_eq!(setup.calls(), 1);
        assert_eq!(ctx.envs["SETUP"], "done");
        assert_eq!(ctx.envs["A"], "1");
        assert_eq!(ctx.envs["B"], "1");
    }

    #[tokio::test]
    async fn test_mutual_needs_are_rejected() {
        let a = Arc::new(FnInterceptor::set_env("A", "1"));
        let pipeline = pipeline_of([
            ("a", needs(&["b"], a.clone())),
            ("b", needs(&["a"], Arc::new(FnInterceptor::set_env("B", "1")))),
        ]);

        let err = tokio::time::timeout(Duration::from_secs(3), async {
            pipeline.step("a").unwrap().entrypoint().err()
        })
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(err, StepError::Validation(_)));
        assert_eq!(err.to_string(), "reference cycle: a -> b -> a");
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_dependency_aborts() {
        let body = Arc::new(FnInterceptor::set_env("B", "1"));
        let pipeline = pipeline_of([
            ("build", needs(&["setup"], body.clone())),
            (
                "setup",
                InterceptorChain::new().with(Arc::new(FnInterceptor::failing(StepError::Timeout))),
            ),
        ]);

        let next = pipeline.step("build").unwrap().entrypoint().unwrap();
        let (_, result) = next(StepContext::new("/tmp")).await;
        assert!(matches!(result, Err(StepError::Timeout)));
        assert_eq!(body.calls(), 0);
    }
}
