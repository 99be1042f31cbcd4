use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{prefix_name, StepContext};
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing::trace;

/// Gives the step a scratch directory at `<dir>/<prefixed step>/_data`.
#[derive(Debug)]
pub struct TmpDir {
    step: String,
}

impl TmpDir {
    /// Creates the interceptor.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let data_dir = ctx
            .dir
            .join(prefix_name(&self.step, &ctx.name_prefix))
            .join("_data");

        if let Err(err) = tokio::fs::create_dir_all(&data_dir).await {
            return (ctx, Err(err.into()));
        }
        trace!(step = %self.step, data_dir = %data_dir.display(), "data directory ready");

        let previous = ctx.data_dir.replace(data_dir.clone());
        let (mut ctx, result) = next(ctx).await;

        if let Some(entry) = ctx.steps.get_mut(&self.step) {
            entry.data_dir = Some(data_dir);
        }
        ctx.data_dir = previous;
        (ctx, result)
    }
}

impl Interceptor for TmpDir {
    fn name(&self) -> &'static str {
        "tmp-dir"
    }

    fn priority(&self) -> i32 {
        super::priority::TMP_DIR
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepResult;
    use crate::interceptors::InterceptorChain;
    use crate::testing::{test_pipeline, FnInterceptor};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_prefixed_data_dir() {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("ab12cd-build").join("_data");
        let expected_body = expected.clone();

        let next = InterceptorChain::new()
            .with(Arc::new(TmpDir::new("build")))
            .with(Arc::new(FnInterceptor::new(move |ctx: StepContext| {
                let expected = expected_body.clone();
                async move {
                    assert_eq!(ctx.data_dir.as_deref(), Some(expected.as_path()));
                    assert!(expected.is_dir());
                    (ctx, Ok(()))
                }
            })))
            .build(&test_pipeline())
            .unwrap();

        let mut ctx = StepContext::new(dir.path());
        ctx.name_prefix = "ab12cd".into();
        ctx.steps.insert("build".into(), StepResult::started());

        let (ctx, result) = next(ctx).await;
        result.unwrap();
        assert!(ctx.data_dir.is_none());
        assert_eq!(ctx.steps["build"].data_dir, Some(expected));
    }
}
