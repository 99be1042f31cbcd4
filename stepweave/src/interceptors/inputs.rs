use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::{ParamValue, StepContext};
use crate::errors::StepError;
use crate::expressions::{coerce, ExpressionEngine, Substitutor};
use crate::pipeline::{Pipeline, StepInput};
use std::collections::HashMap;
use std::sync::Arc;

/// Evaluates the step's declared inputs into `inputs` for the duration of
/// the continuation.
pub struct InputVars {
    inputs: Vec<StepInput>,
    engine: Arc<ExpressionEngine>,
}

impl InputVars {
    /// Creates the interceptor.
    #[must_use]
    pub fn new(inputs: Vec<StepInput>, engine: Arc<ExpressionEngine>) -> Self {
        Self { inputs, engine }
    }

    fn evaluate(&self, ctx: &StepContext) -> Result<HashMap<String, ParamValue>, StepError> {
        let substitutor = Substitutor::new(&self.engine, ctx);
        let mut evaluated = HashMap::with_capacity(self.inputs.len());

        for input in &self.inputs {
            let value = match &input.value {
                Some(document) => substitutor.resolve(document)?,
                None => serde_json::Value::Null,
            };

            let value = match value {
                serde_json::Value::Null => input.default.clone(),
                value => Some(
                    ParamValue::from_json(&value)
                        .unwrap_or_else(|| ParamValue::String(coerce(&value))),
                ),
            };

            if let Some(value) = value {
                evaluated.insert(input.name.clone(), value);
            }
        }
        Ok(evaluated)
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let evaluated = match self.evaluate(&ctx) {
            Ok(evaluated) => evaluated,
            Err(err) => return (ctx, Err(err)),
        };

        let previous = ctx.inputs.clone();
        ctx.inputs.extend(evaluated);

        let (mut ctx, result) = next(ctx).await;
        ctx.inputs = previous;
        (ctx, result)
    }
}

impl std::fmt::Debug for InputVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputVars")
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl Interceptor for InputVars {
    fn name(&self) -> &'static str {
        "input-vars"
    }

    fn priority(&self) -> i32 {
        super::priority::INPUT_VARS
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
