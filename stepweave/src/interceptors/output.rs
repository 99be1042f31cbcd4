//! Declared output parameters.

use super::vars::create_var_file;
use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{OutputParam, ParamValue, StepContext};
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Creates one file per declared output and reads each back as a parameter
/// value once the step returns. Empty files leave the output unset.
#[derive(Debug)]
pub struct OutputVars {
    outputs: Vec<String>,
}

impl OutputVars {
    /// Creates the interceptor for the declared output names.
    #[must_use]
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let mut files = Vec::with_capacity(self.outputs.len());
        for name in &self.outputs {
            match create_var_file(ctx.tmp_dir(), "output") {
                Ok(file) => files.push((name.clone(), file)),
                Err(err) => return (ctx, Err(err)),
            }
        }

        let previous = std::mem::replace(
            &mut ctx.outputs,
            files
                .iter()
                .map(|(name, file)| OutputParam {
                    name: name.clone(),
                    path: file.path().to_path_buf(),
                })
                .collect(),
        );

        let (mut ctx, result) = next(ctx).await;
        ctx.outputs = previous;
        if result.is_err() {
            return (ctx, result);
        }

        for (name, file) in &files {
            match tokio::fs::read_to_string(file.path()).await {
                Ok(raw) if raw.trim().is_empty() => {}
                Ok(raw) => {
                    ctx.output_vars.insert(name.clone(), ParamValue::parse_output(&raw));
                }
                Err(err) => return (ctx, Err(err.into())),
            }
        }
        (ctx, result)
    }
}

impl Interceptor for OutputVars {
    fn name(&self) -> &'static str {
        "output-vars"
    }

    fn priority(&self) -> i32 {
        super::priority::OUTPUT_VARS
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
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_outputs_read_back() {
        let dir = TempDir::new().unwrap();
        let body = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            for output in &ctx.outputs {
                let content = match output.name.as_str() {
                    "list" => "[\"a\",\"b\"]",
                    _ => "plain value\n",
                };
                std::fs::write(&output.path, content).unwrap();
            }
            (ctx, Ok(()))
        }));

        let next = InterceptorChain::new()
            .with(Arc::new(OutputVars::new(["list", "text"])))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let (ctx, result) = next(StepContext::new(dir.path())).await;
        result.unwrap();
        assert_eq!(ctx.output_vars["list"], ParamValue::array(["a", "b"]));
        assert_eq!(ctx.output_vars["text"], ParamValue::string("plain value"));
        assert!(ctx.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_keeps_outputs_unset() {
        let dir = TempDir::new().unwrap();
        let next = InterceptorChain::new()
            .with(Arc::new(OutputVars::new(["x"])))
            .with(Arc::new(FnInterceptor::failing(StepError::Timeout)))
            .build(&test_pipeline())
            .unwrap();

        let (ctx, result) = next(StepContext::new(dir.path())).await;
        assert!(result.is_err());
        assert!(ctx.output_vars.is_empty());
    }
}
