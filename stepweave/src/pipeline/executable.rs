//! A built pipeline ready to run.

use super::{parse_inputs, Engine, Pipeline, PipelineSpec};
use crate::cancellation::CancellationToken;
use crate::context::{ContextSnapshot, ParamValue, StdioSet, StepContext};
use crate::errors::StepError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// Options of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Step to start from; the pipeline's entrypoint when absent.
    pub entrypoint: Option<String>,
    /// Values for the declared pipeline inputs.
    pub inputs: HashMap<String, ParamValue>,
    /// Stdio handed to the entrypoint.
    pub stdio: StdioSet,
    /// Token cancelling the run.
    pub cancel: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `entrypoint`.
    #[must_use]
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Supplies an input value.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Sets the stdio.
    #[must_use]
    pub fn with_stdio(mut self, stdio: StdioSet) -> Self {
        self.stdio = stdio;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// The final context.
    pub context: StepContext,
    /// The result of the entrypoint.
    pub result: Result<(), StepError>,
    /// Teardowns that failed, as `(name, message)`.
    pub teardown_failures: Vec<(String, String)>,
}

impl RunOutcome {
    /// Whether the entrypoint did not abort.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.as_ref().map_or_else(|err| !err.abort_on_error(), |_| true)
    }
}

/// A pipeline bound to its engine and specification.
#[derive(Debug, Clone)]
pub struct Executable {
    engine: Engine,
    spec: PipelineSpec,
    pipeline: Arc<Pipeline>,
}

impl Executable {
    pub(crate) const fn new(engine: Engine, spec: PipelineSpec, pipeline: Arc<Pipeline>) -> Self {
        Self {
            engine,
            spec,
            pipeline,
        }
    }

    /// The built pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The specification it was built from.
    #[must_use]
    pub const fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// `<context_dir>/<pipeline name>`.
    #[must_use]
    pub fn context_dir(&self) -> PathBuf {
        let root = &self.engine.config().context_dir;
        if self.spec.name.is_empty() {
            root.clone()
        } else {
            root.join(&self.spec.name)
        }
    }

    /// Runs the pipeline.
    ///
    /// Recovers the ledger from a previous `context.json`, runs the
    /// entrypoint, stores the context again and finally drains the teardown
    /// queue within the configured grace period. Errors returned directly are
    /// the ones raised before the entrypoint started.
    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome, StepError> {
        let dir = self.context_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let inputs = parse_inputs(&self.spec.inputs, &options.inputs)?;
        let entrypoint = self
            .pipeline
            .entrypoint(options.entrypoint.as_deref())?
            .entrypoint()?;

        let mut ctx = StepContext::new(&dir)
            .with_inputs(inputs)
            .with_stdio(options.stdio);
        if let Some(cancel) = options.cancel {
            ctx = ctx.with_cancel(cancel);
        }
        ctx.name_prefix.clone_from(&self.spec.name);

        if let Some(snapshot) = ContextSnapshot::load(&dir).await? {
            snapshot.restore_into(&mut ctx);
        }

        let span = info_span!(
            "pipeline",
            pipeline = %self.spec.name,
            id = %self.pipeline.id(),
            run = %ctx.scope.run_id(),
        );

        async move {
            info!("pipeline started");
            let (ctx, mut result) = entrypoint(ctx).await;

            if let Err(err) = ContextSnapshot::capture(&ctx).store(&dir).await {
                error!(error = %err, "failed to store context");
                if result.is_ok() {
                    result = Err(err);
                }
            }

            let teardown_failures = self
                .engine
                .teardown()
                .run_all(self.engine.config().graceful_termination())
                .await;
            if !teardown_failures.is_empty() {
                warn!(count = teardown_failures.len(), "teardowns failed");
            }

            match &result {
                Ok(()) => info!("pipeline finished"),
                Err(err) => info!(outcome = %err.outcome(), error = %err, "pipeline finished"),
            }

            Ok(RunOutcome {
                context: ctx,
                result,
                teardown_failures,
            })
        }
        .instrument(span)
        .await
    }
}
