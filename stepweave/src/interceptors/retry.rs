//! Retry with backoff.

use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::StepContext;
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use crate::pipeline::RetrySpec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant(Duration),
    /// Exponential: delay * 2^(attempt - 1).
    Exponential(Duration),
}

impl BackoffStrategy {
    /// Calculates the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant(d) => *d,
            Self::Exponential(d) => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                d.saturating_mul(factor)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Constant(Duration::ZERO)
    }
}

/// Calls the continuation again when it fails.
///
/// Skip sentinels and cancellation are returned as they are. Each attempt
/// starts from the context the previous attempt returned.
#[derive(Debug)]
pub struct Retry {
    step: String,
    max_retries: Option<u32>,
    backoff: BackoffStrategy,
}

impl Retry {
    /// Creates a retry policy. `max_retries = None` retries until the step
    /// succeeds or the run is cancelled.
    #[must_use]
    pub fn new(step: impl Into<String>, max_retries: Option<u32>, backoff: BackoffStrategy) -> Self {
        Self {
            step: step.into(),
            max_retries,
            backoff,
        }
    }

    /// Creates a policy from a step's retry specification. Exponential
    /// backoff wins when both delays are set.
    #[must_use]
    pub fn from_spec(step: impl Into<String>, spec: &RetrySpec) -> Self {
        let backoff = match (spec.exponential_ms, spec.constant_ms) {
            (Some(ms), _) if ms > 0 => BackoffStrategy::Exponential(Duration::from_millis(ms)),
            (_, Some(ms)) => BackoffStrategy::Constant(Duration::from_millis(ms)),
            _ => BackoffStrategy::default(),
        };
        Self::new(step, spec.max_retries.filter(|n| *n > 0), backoff)
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let mut attempt: u32 = 0;
        loop {
            let (out, result) = next(ctx).await;
            ctx = out;

            let err = match result {
                Ok(()) => return (ctx, Ok(())),
                Err(err) if err.is_skip() || err.is_cancelled() => return (ctx, Err(err)),
                Err(err) => err,
            };

            if self.max_retries.is_some_and(|max| attempt >= max) {
                warn!(step = %self.step, attempts = attempt + 1, error = %err, "retries exhausted");
                return (ctx, Err(err));
            }

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay(attempt);
            debug!(step = %self.step, attempt, ?delay, error = %err, "retrying step");

            let cancel = Arc::clone(&ctx.cancel);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    let reason = cancel.reason().unwrap_or_default();
                    return (ctx, Err(StepError::Cancelled(reason)));
                }
            }
        }
    }
}

impl Interceptor for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn priority(&self) -> i32 {
        super::priority::RETRY
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
