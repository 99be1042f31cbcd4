//! The ledger entry of a step.

use super::vars::{create_var_file, keep_step_error, parse_var_file};
use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{ParamValue, StepContext, StepResult};
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use std::collections::HashMap;
use std::sync::Arc;

/// Records `steps[name]` around the continuation.
///
/// Before: creates the step's output variables file and stores a started
/// entry. After: seals the entry with the end time, the error and the
/// outputs (from the file and from `output_vars`), and wraps errors with the
/// step name.
#[derive(Debug)]
pub struct Ledger {
    step: String,
}

impl Ledger {
    /// Creates the recorder for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let file = match create_var_file(ctx.tmp_dir(), "output") {
            Ok(file) => file,
            Err(err) => return (ctx, Err(StepError::step(&self.step, err))),
        };

        let previous_file = ctx.output_file.replace(file.path().to_path_buf());
        let previous_vars = std::mem::take(&mut ctx.output_vars);
        ctx.steps.insert(self.step.clone(), StepResult::started());

        let (mut ctx, mut result) = next(ctx).await;

        let mut outputs: HashMap<String, ParamValue> = match parse_var_file(file.path()) {
            Ok(vars) => vars
                .into_iter()
                .map(|(k, v)| (k, ParamValue::String(v)))
                .collect(),
            Err(err) => {
                keep_step_error(&mut result, err);
                HashMap::new()
            }
        };
        outputs.extend(std::mem::replace(&mut ctx.output_vars, previous_vars));
        ctx.output_file = previous_file;

        let entry = ctx.steps.entry(self.step.clone()).or_insert_with(StepResult::started);
        entry.outputs.extend(outputs);
        if entry.data_dir.is_none() {
            entry.data_dir.clone_from(&ctx.data_dir);
        }
        entry.seal(&result);

        let result = result.map_err(|err| StepError::step(&self.step, err));
        (ctx, result)
    }
}

impl Interceptor for Ledger {
    fn name(&self) -> &'static str {
        "ledger"
    }

    fn priority(&self) -> i32 {
        super::priority::LEDGER
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepOutcome;
    use crate::interceptors::InterceptorChain;
    use crate::testing::{test_pipeline, FnInterceptor};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_and_seals_entry() {
        let dir = TempDir::new().unwrap();
        let body = Arc::new(FnInterceptor::new(|mut ctx: StepContext| async move {
            assert!(ctx.steps["build"].started_at.is_some());
            assert!(ctx.steps["build"].ended_at.is_none());
            let path = ctx.output_file.clone().unwrap();
            std::fs::write(path, "VERSION=1.2.3\n").unwrap();
            ctx.output_vars.insert("artifacts".into(), ParamValue::array(["a", "b"]));
            (ctx, Ok(()))
        }));

        let next = InterceptorChain::new()
            .with(Arc::new(Ledger::new("build")))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let (ctx, result) = next(StepContext::new(dir.path())).await;
        result.unwrap();

        let entry = &ctx.steps["build"];
        assert!(entry.is_completed());
        assert_eq!(entry.outcome, Some(StepOutcome::Success));
        assert_eq!(entry.outputs["VERSION"], ParamValue::string("1.2.3"));
        assert_eq!(entry.outputs["artifacts"], ParamValue::array(["a", "b"]));
        assert!(ctx.output_file.is_none());
        assert!(ctx.output_vars.is_empty());
    }

    #[tokio::test]
    async fn test_wraps_error_with_step_name() {
        let dir = TempDir::new().unwrap();
        let next = InterceptorChain::new()
            .with(Arc::new(Ledger::new("build")))
            .with(Arc::new(FnInterceptor::failing(StepError::Timeout)))
            .build(&test_pipeline())
            .unwrap();

        let (ctx, result) = next(StepContext::new(dir.path())).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "step build failed: operation timed out"
        );
        assert_eq!(ctx.steps["build"].error.as_deref(), Some("operation timed out"));
        assert!(ctx.steps["build"].ended_at.is_some());
    }
}
