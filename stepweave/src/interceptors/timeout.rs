use super::{wrap, Interceptor, Next, StepOutput};
use crate::cancellation::CancellationToken;
use crate::context::StepContext;
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bounds the continuation by a deadline.
///
/// The continuation runs under a child cancellation token. When the deadline
/// passes the token is cancelled and the continuation is drained before
/// [`StepError::Timeout`] is returned.
#[derive(Debug)]
pub struct Timeout {
    step: String,
    duration: Duration,
}

impl Timeout {
    /// Creates the deadline.
    #[must_use]
    pub fn new(step: impl Into<String>, duration: Duration) -> Self {
        Self {
            step: step.into(),
            duration,
        }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let parent = Arc::clone(&ctx.cancel);
        let child = CancellationToken::child(&parent);
        ctx.cancel = Arc::clone(&child);

        let mut run = next(ctx);
        let finished = tokio::select! {
            output = &mut run => Some(output),
            () = tokio::time::sleep(self.duration) => None,
        };

        let (mut ctx, result) = match finished {
            Some(output) => output,
            None => {
                warn!(step = %self.step, timeout = ?self.duration, "step timed out");
                child.cancel("operation timed out");
                let (ctx, _) = run.await;
                (ctx, Err(StepError::Timeout))
            }
        };

        ctx.cancel = parent;
        (ctx, result)
    }
}

impl Interceptor for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn priority(&self) -> i32 {
        super::priority::TIMEOUT
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

    fn sleeper(duration: Duration) -> Arc<FnInterceptor> {
        Arc::new(FnInterceptor::new(move |ctx: StepContext| async move {
            let cancel = Arc::clone(&ctx.cancel);
            tokio::select! {
                () = tokio::time::sleep(duration) => (ctx, Ok(())),
                () = cancel.cancelled() => (ctx, Err(StepError::Cancelled("stopped".into()))),
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let next = InterceptorChain::new()
            .with(Arc::new(Timeout::new("slow", Duration::from_millis(50))))
            .with(sleeper(Duration::from_secs(10)))
            .build(&test_pipeline())
            .unwrap();

        let ctx = StepContext::new("/tmp");
        let root = Arc::clone(&ctx.cancel);
        let (ctx, result) = next(ctx).await;

        assert!(matches!(result, Err(StepError::Timeout)));
        assert!(result.unwrap_err().abort_on_error());
        assert!(Arc::ptr_eq(&ctx.cancel, &root));
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_deadline() {
        let next = InterceptorChain::new()
            .with(Arc::new(Timeout::new("fast", Duration::from_secs(1))))
            .with(sleeper(Duration::from_millis(10)))
            .build(&test_pipeline())
            .unwrap();

        let (_, result) = next(StepContext::new("/tmp")).await;
        assert!(result.is_ok());
    }
}
