//! Skip policies and tolerated failures.

use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::StepContext;
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Skips a step the ledger already marks as done.
///
/// A ledger entry counts as done when it carries an error but was never
/// sealed (a run interrupted mid-step, recovered from a snapshot), or when it
/// was sealed without error.
#[derive(Debug)]
pub struct SkipDone {
    step: String,
}

impl SkipDone {
    /// Creates the policy for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        let done = ctx
            .steps
            .get(&self.step)
            .is_some_and(|entry| entry.is_interrupted() || entry.is_completed());

        if done {
            debug!(step = %self.step, "ledger marks step as done");
            return (ctx, Err(StepError::SkipDone));
        }
        next(ctx).await
    }
}

impl Interceptor for SkipDone {
    fn name(&self) -> &'static str {
        "skip-done"
    }

    fn priority(&self) -> i32 {
        super::priority::SKIP_DONE
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

/// Skips steps named in a caller-supplied deny-list.
#[derive(Debug)]
pub struct SkipBlacklist {
    step: String,
    blacklist: HashSet<String>,
}

impl SkipBlacklist {
    /// Creates the policy for `step`.
    #[must_use]
    pub fn new<I, S>(step: impl Into<String>, blacklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            step: step.into(),
            blacklist: blacklist.into_iter().map(Into::into).collect(),
        }
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        if self.blacklist.contains(&self.step) {
            debug!(step = %self.step, "step is deny-listed");
            return (ctx, Err(StepError::SkipBlacklist));
        }
        next(ctx).await
    }
}

impl Interceptor for SkipBlacklist {
    fn name(&self) -> &'static str {
        "skip-blacklist"
    }

    fn priority(&self) -> i32 {
        super::priority::SKIP_BLACKLIST
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

/// Turns any failure of the continuation into a non-aborting
/// [`StepError::AllowFailure`].
#[derive(Debug)]
pub struct AllowFailure {
    step: String,
}

impl AllowFailure {
    /// Creates the policy for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        match next(ctx).await {
            (ctx, Err(err)) => {
                warn!(step = %self.step, error = %err, "ignoring step failure");
                (ctx, Err(StepError::AllowFailure(Box::new(err))))
            }
            ok => ok,
        }
    }
}

impl Interceptor for AllowFailure {
    fn name(&self) -> &'static str {
        "allow-failure"
    }

    fn priority(&self) -> i32 {
        super::priority::ALLOW_FAILURE
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
