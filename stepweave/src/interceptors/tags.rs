use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{StepContext, Tag};
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Attaches the step's tags for the duration of the continuation.
#[derive(Debug)]
pub struct Tags {
    tags: Vec<Tag>,
}

impl Tags {
    /// Creates the interceptor.
    #[must_use]
    pub fn new(tags: Vec<Tag>) -> Self {
        Self { tags }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let previous = ctx.tags.clone();
        for tag in &self.tags {
            ctx.with_tag(tag.clone());
        }

        let (mut ctx, result) = next(ctx).await;
        ctx.tags = previous;
        (ctx, result)
    }
}

impl Interceptor for Tags {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn priority(&self) -> i32 {
        super::priority::TAGS
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
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_tags_scoped_to_step() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_body = seen.clone();
        let body = Arc::new(FnInterceptor::new(move |ctx: StepContext| {
            seen_in_body.lock().extend(ctx.tags.clone());
            async move { (ctx, Ok(())) }
        }));

        let next = InterceptorChain::new()
            .with(Arc::new(Tags::new(vec![
                Tag::new("team", "core"),
                Tag::new("os", "linux").with_color("#ffffff"),
            ])))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let mut ctx = StepContext::new("/tmp");
        ctx.with_tag(Tag::new("os", "darwin"));
        let (ctx, result) = next(ctx).await;
        result.unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].key, "os");
        assert_eq!(seen[0].value, "linux");
        assert_eq!(seen[0].color, "#ffffff");
        assert_eq!(seen[1].key, "team");
        assert!(!seen[1].color.is_empty());

        assert_eq!(ctx.tags.len(), 1);
        assert_eq!(ctx.tags[0].value, "darwin");
    }
}
