//! Conditional execution.

use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{expression_view, StepContext};
use crate::errors::{PipelineValidationError, StepError};
use crate::expressions::ExpressionEngine;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing::debug;

/// Runs the continuation only when every condition evaluates to `true`.
///
/// Conditions are compiled when the chain is built. The first condition that
/// evaluates to `false` short-circuits with [`StepError::ConditionFalse`].
pub struct If {
    step: String,
    conditions: Vec<String>,
    engine: Arc<ExpressionEngine>,
}

impl If {
    /// Creates the guard.
    #[must_use]
    pub fn new(step: impl Into<String>, conditions: Vec<String>, engine: Arc<ExpressionEngine>) -> Self {
        Self {
            step: step.into(),
            conditions,
            engine,
        }
    }

    fn holds(&self, ctx: &StepContext) -> Result<bool, StepError> {
        let view = expression_view(ctx);
        for condition in &self.conditions {
            if !self.engine.evaluate_bool(condition, &view)? {
                debug!(step = %self.step, %condition, "condition is false");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        match self.holds(&ctx) {
            Ok(true) => next(ctx).await,
            Ok(false) => (ctx, Err(StepError::ConditionFalse)),
            Err(err) => (ctx, Err(err)),
        }
    }
}

impl std::fmt::Debug for If {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("If")
            .field("step", &self.step)
            .field("conditions", &self.conditions)
            .finish_non_exhaustive()
    }
}

impl Interceptor for If {
    fn name(&self) -> &'static str {
        "if"
    }

    fn priority(&self) -> i32 {
        super::priority::IF
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        for condition in &self.conditions {
            self.engine
                .compile(condition)
                .map_err(|err| PipelineValidationError::expression(&self.step, &err))?;
        }
        Ok(wrap(self, next, Self::call))
    }
}
