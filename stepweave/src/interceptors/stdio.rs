//! Stdio redirection to and from files.

use super::{wrap, Interceptor, LateBinding, Next, StepOutput};
use crate::context::{InputStream, OutputStream, StepContext};
use crate::errors::StepError;
use crate::pipeline::{Pipeline, StreamSpec, Streams};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tracing::debug;

/// Redirects stdout/stderr to files and stdin from a file for the duration
/// of the continuation.
///
/// Without `tee` a redirected output stream replaces the inherited writers;
/// with `tee` it is added next to them. Paths are late bound.
#[derive(Debug)]
pub struct StdioRedirect {
    step: String,
    streams: Streams,
    tee: bool,
}

impl StdioRedirect {
    /// Creates the redirection.
    #[must_use]
    pub fn new(step: impl Into<String>, streams: Streams, tee: bool) -> Self {
        Self {
            step: step.into(),
            streams,
            tee,
        }
    }

    fn binding_key(&self) -> String {
        format!("{}/streams", self.step)
    }

    async fn open(&self, spec: &StreamSpec) -> Result<OutputStream, StepError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(spec.append)
            .truncate(!spec.append)
            .open(&spec.path)
            .await
            .map_err(|e| StepError::Io(format!("failed to redirect to {}: {e}", spec.path)))?;
        Ok(OutputStream::new(file))
    }

    async fn redirect(&self, ctx: &mut StepContext) -> Result<(), StepError> {
        let streams: Streams = ctx.binding(&self.binding_key(), &self.streams)?;

        if let Some(spec) = &streams.stdout {
            let stream = self.open(spec).await?;
            if !self.tee {
                ctx.stdio.stdout.clear();
            }
            ctx.stdio.stdout.push(stream);
            debug!(step = %self.step, path = %spec.path, "stdout redirected");
        }

        if let Some(spec) = &streams.stderr {
            let stream = self.open(spec).await?;
            if !self.tee {
                ctx.stdio.stderr.clear();
            }
            ctx.stdio.stderr.push(stream);
            debug!(step = %self.step, path = %spec.path, "stderr redirected");
        }

        if let Some(spec) = &streams.stdin {
            let file = File::open(&spec.path)
                .await
                .map_err(|e| StepError::Io(format!("failed to read stdin from {}: {e}", spec.path)))?;
            ctx.stdio.stdin = Some(InputStream::new(file));
        }

        Ok(())
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let previous = ctx.stdio.clone();
        if let Err(err) = self.redirect(&mut ctx).await {
            ctx.stdio = previous;
            return (ctx, Err(err));
        }

        let (mut ctx, result) = next(ctx).await;
        ctx.stdio = previous;
        (ctx, result)
    }
}

impl Interceptor for StdioRedirect {
    fn name(&self) -> &'static str {
        "stdio-redirect"
    }

    fn priority(&self) -> i32 {
        super::priority::STDIO_REDIRECT
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }

    fn late_binding(&self) -> Option<LateBinding> {
        let document = serde_json::to_value(&self.streams).ok()?;
        Some(LateBinding {
            outside_matrix: true,
            ..LateBinding::new(self.binding_key(), document)
        })
    }
}
