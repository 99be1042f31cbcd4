//! Step lifecycle logging and event reporting.

use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::StepContext;
use crate::errors::{StepError, StepOutcome};
use crate::events::{EventSink, StepEvent};
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Opens a tracing span per step and logs its start and outcome.
#[derive(Debug)]
pub struct Logger {
    step: String,
}

impl Logger {
    /// Creates the logger for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }
}

impl Interceptor for Logger {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn priority(&self) -> i32 {
        super::priority::LOGGER
    }

    fn bootstrap(self: Arc<Self>, pipeline: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        let pipeline_name = pipeline.name().to_string();
        Ok(wrap(self, next, move |this, ctx: StepContext, next: Next| {
            let span = info_span!(
                "step",
                step = %this.step,
                prefix = %ctx.name_prefix,
                pipeline = %pipeline_name,
            );
            async move {
                debug!("step started");
                let (ctx, result) = next(ctx).await;
                let outcome = StepOutcome::of(&result);
                match &result {
                    Err(err) if err.abort_on_error() => {
                        warn!(outcome = %outcome, error = %err, "step failed");
                    }
                    Err(err) => info!(outcome = %outcome, reason = %err, "step finished"),
                    Ok(()) => info!(outcome = %outcome, "step finished"),
                }
                (ctx, result)
            }
            .instrument(span)
        }))
    }
}

/// Emits `step.*` lifecycle events into an [`EventSink`].
pub struct Report {
    step: String,
    sink: Arc<dyn EventSink>,
}

impl Report {
    /// Creates the reporter for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            step: step.into(),
            sink,
        }
    }
}

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Report").field("step", &self.step).finish()
    }
}

impl Interceptor for Report {
    fn name(&self) -> &'static str {
        "report"
    }

    fn priority(&self) -> i32 {
        super::priority::REPORT
    }

    fn bootstrap(self: Arc<Self>, pipeline: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        let pipeline_name = pipeline.name().to_string();
        Ok(wrap(self, next, move |this, ctx: StepContext, next: Next| {
            let pipeline_name = pipeline_name.clone();
            async move { this.call(&pipeline_name, ctx, next).await }
        }))
    }
}

impl Report {
    async fn call(&self, pipeline: &str, ctx: StepContext, next: Next) -> StepOutput {
        let tags = ctx
            .tags
            .iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect();
        let started = StepEvent::started(&self.step, &ctx.name_prefix, pipeline).with_tags(tags);
        self.sink.emit(&started).await;

        let (ctx, result) = next(ctx).await;

        let error = result.as_ref().err().map(ToString::to_string);
        self.sink
            .emit(&started.finish(StepOutcome::of(&result), error))
            .await;
        (ctx, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingEventSink, StepEventKind};
    use crate::interceptors::InterceptorChain;
    use crate::testing::{test_pipeline, FnInterceptor};

    #[tokio::test]
    async fn test_report_emits_lifecycle() {
        let sink = Arc::new(CollectingEventSink::new());
        let chain = InterceptorChain::new()
            .with(Arc::new(Logger::new("build")))
            .with(Arc::new(Report::new("build", sink.clone())))
            .with(Arc::new(FnInterceptor::failing(StepError::ConditionFalse)));

        let next = chain.build(&test_pipeline()).unwrap();
        let (_, result) = next(StepContext::new("/tmp")).await;
        assert!(matches!(result, Err(StepError::ConditionFalse)));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, StepEventKind::Started);
        assert_eq!(events[1].kind, StepEventKind::Skipped);
        assert_eq!(events[1].outcome, Some(StepOutcome::SkippedCondition));
        assert_eq!(events[1].pipeline, "test");
    }

    #[tokio::test]
    async fn test_report_failure() {
        let sink = Arc::new(CollectingEventSink::new());
        let chain = InterceptorChain::new()
            .with(Arc::new(Report::new("build", sink.clone())))
            .with(Arc::new(FnInterceptor::failing(StepError::Timeout)));

        let next = chain.build(&test_pipeline()).unwrap();
        next(StepContext::new("/tmp")).await.1.unwrap_err();

        assert_eq!(sink.types_for("build"), vec!["step.started", "step.failed"]);
        assert_eq!(
            sink.events()[1].error.as_deref(),
            Some("operation timed out")
        );
    }
}
