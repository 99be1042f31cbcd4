//! Test fixtures for contexts and pipelines.

use crate::context::{CaptureBuffer, ParamValue, StdioSet, StepContext};
use crate::interceptors::InterceptorChain;
use crate::pipeline::Pipeline;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A step context builder.
#[derive(Debug, Default)]
pub struct TestContext {
    /// Environment variables.
    pub envs: HashMap<String, String>,
    /// Inputs.
    pub inputs: HashMap<String, ParamValue>,
    /// Captured stdout, if requested.
    pub stdout: Option<CaptureBuffer>,
}

impl TestContext {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Captures stdout into `buffer`.
    #[must_use]
    pub fn with_stdout(mut self, buffer: &CaptureBuffer) -> Self {
        self.stdout = Some(buffer.clone());
        self
    }

    /// Builds a context rooted at `dir`.
    #[must_use]
    pub fn build(self, dir: &Path) -> StepContext {
        let mut ctx = StepContext::new(dir).with_inputs(self.inputs);
        ctx.envs = self.envs;
        if let Some(buffer) = self.stdout {
            ctx = ctx.with_stdio(StdioSet {
                stdout: vec![buffer.stream()],
                ..StdioSet::default()
            });
        }
        ctx
    }
}

/// An empty pipeline.
#[must_use]
pub fn test_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new("test"))
}

/// A pipeline made of the given steps.
///
/// # Panics
///
/// Panics on duplicate step names.
#[must_use]
#[allow(clippy::expect_used)]
pub fn pipeline_of<I, S>(steps: I) -> Arc<Pipeline>
where
    I: IntoIterator<Item = (S, InterceptorChain)>,
    S: Into<String>,
{
    let mut pipeline = Pipeline::new("test");
    for (name, chain) in steps {
        pipeline
            .add_step(name, chain)
            .expect("fixture step names are unique");
    }
    Arc::new(pipeline)
}
