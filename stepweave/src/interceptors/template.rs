use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{merge_template, StepContext, Template};
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Fills the context's container template for the continuation.
///
/// An unset context template starts from the global template; the step's own
/// template then fills every field that is still empty. The caller's template
/// is restored afterwards.
#[derive(Debug)]
pub struct ApplyTemplate {
    global: Template,
    step: Option<Template>,
}

impl ApplyTemplate {
    /// Creates the interceptor.
    #[must_use]
    pub const fn new(global: Template, step: Option<Template>) -> Self {
        Self { global, step }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let previous = ctx.template.clone();

        if ctx.template.is_none() {
            ctx.template = Some(self.global.clone());
        }
        merge_template(&mut ctx.template, self.step.as_ref());

        let (mut ctx, result) = next(ctx).await;
        ctx.template = previous;
        (ctx, result)
    }
}

impl Interceptor for ApplyTemplate {
    fn name(&self) -> &'static str {
        "template"
    }

    fn priority(&self) -> i32 {
        super::priority::TEMPLATE
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
