//! Panic boundary around a step.

use super::{wrap, Interceptor, Next, StepOutput};
use crate::cancellation::panic_message;
use crate::context::StepContext;
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// Converts a panic in the continuation into [`StepError::Panic`].
///
/// The context handed back is the one the step was entered with.
#[derive(Debug)]
pub struct Recover {
    step: String,
}

impl Recover {
    /// Creates the boundary for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        let entered = ctx.clone();
        match AssertUnwindSafe(next(ctx)).catch_unwind().await {
            Ok(output) => output,
            Err(payload) => {
                let payload = panic_message(payload.as_ref());
                error!(step = %self.step, %payload, "recovered from panic");
                (
                    entered,
                    Err(StepError::Panic {
                        step: self.step.clone(),
                        payload,
                    }),
                )
            }
        }
    }
}

impl Interceptor for Recover {
    fn name(&self) -> &'static str {
        "recover"
    }

    fn priority(&self) -> i32 {
        super::priority::RECOVER
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptors::InterceptorChain;
    use crate::testing::{test_pipeline, FnInterceptor};

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let chain = InterceptorChain::new()
            .with(Arc::new(Recover::new("boom")))
            .with(Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
                if ctx.envs.is_empty() {
                    panic!("something broke");
                }
                (ctx, Ok(()))
            })));

        let next = chain.build(&test_pipeline()).unwrap();
        let mut ctx = StepContext::new("/tmp");
        ctx.inputs.insert("kept".into(), "yes".into());

        let (out, result) = next(ctx).await;
        match result {
            Err(StepError::Panic { step, payload }) => {
                assert_eq!(step, "boom");
                assert_eq!(payload, "something broke");
            }
            other => panic!("expected panic error, got {other:?}"),
        }
        assert!(out.inputs.contains_key("kept"));
    }

    #[tokio::test]
    async fn test_passes_through_results() {
        let chain = InterceptorChain::new()
            .with(Arc::new(Recover::new("ok")))
            .with(Arc::new(FnInterceptor::failing(StepError::Timeout)));

        let next = chain.build(&test_pipeline()).unwrap();
        let (_, result) = next(StepContext::new("/tmp")).await;
        assert!(matches!(result, Err(StepError::Timeout)));
    }
}
