//! The late binding pass.

use super::{wrap, Interceptor, LateBinding, Next, StepOutput};
use crate::context::StepContext;
use crate::errors::StepError;
use crate::expressions::{ExpressionEngine, Substitutor};
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing::trace;

/// Resolves the late bindings of the step's other interceptors right before
/// the continuation and stores them in [`StepContext::bindings`].
///
/// For matrix steps, bindings that only make sense inside a branch are left
/// unresolved until the branch context is entered.
pub struct Substitute {
    bindings: Vec<LateBinding>,
    matrix_step: bool,
    engine: Arc<ExpressionEngine>,
}

impl Substitute {
    /// Creates the pass.
    #[must_use]
    pub fn new(bindings: Vec<LateBinding>, matrix_step: bool, engine: Arc<ExpressionEngine>) -> Self {
        Self {
            bindings,
            matrix_step,
            engine,
        }
    }

    fn resolve(&self, ctx: &mut StepContext) -> Result<Vec<String>, StepError> {
        let outside_branch = self.matrix_step && ctx.matrix.is_empty();
        let substitutor = Substitutor::new(&self.engine, ctx);

        let mut resolved = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            if outside_branch && !binding.outside_matrix {
                trace!(key = %binding.key, "binding deferred to matrix branch");
                continue;
            }
            resolved.push((binding.key.clone(), substitutor.resolve(&binding.document)?));
        }

        let keys = resolved.iter().map(|(k, _)| k.clone()).collect();
        ctx.bindings.extend(resolved);
        Ok(keys)
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let previous = ctx.bindings.clone();
        if let Err(err) = self.resolve(&mut ctx) {
            return (ctx, Err(err));
        }

        let (mut ctx, result) = next(ctx).await;
        ctx.bindings = previous;
        (ctx, result)
    }
}

impl std::fmt::Debug for Substitute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substitute")
            .field("bindings", &self.bindings)
            .field("matrix_step", &self.matrix_step)
            .finish_non_exhaustive()
    }
}

impl Interceptor for Substitute {
    fn name(&self) -> &'static str {
        "substitute"
    }

    fn priority(&self) -> i32 {
        super::priority::SUBSTITUTE
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
