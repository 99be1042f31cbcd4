use crate::context::{prefix_name, suffix_name, ParamValue, RunScope, StepContext, Tag};
use crate::errors::{PipelineValidationError, StepError};
use crate::interceptors::{priority, wrap, Interceptor, LateBinding, Next, StepOutput};
use crate::pipeline::{parse_inputs, Engine, InheritSpec, Pipeline};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

/// Runs another pipeline as a nested execution.
///
/// The pipeline is resolved through the engine's lookup and built with the
/// same engine. It runs on a copy of the context with a fresh ledger, the
/// prefix `<prefix>-<step>` and a `pipeline` tag. Afterwards its environment
/// is merged back, its ledger and containers are merged under
/// `<name>-<step>` and the outputs of its entrypoint become outputs of this
/// step.
pub struct Inherit {
    step: String,
    spec: InheritSpec,
    engine: Engine,
}

impl Inherit {
    /// Creates the interceptor for `step`.
    #[must_use]
    pub fn new(step: impl Into<String>, spec: InheritSpec, engine: Engine) -> Self {
        Self {
            step: step.into(),
            spec,
            engine,
        }
    }

    fn binding_key(&self) -> String {
        format!("{}/inherit", self.step)
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        let (mut ctx, result) = self.run_child(ctx).await;
        if let Err(err) = result {
            if err.abort_on_error() {
                return (ctx, Err(err));
            }
            debug!(step = %self.step, error = %err, "inherited pipeline did not run");
        }
        next(ctx).await
    }

    async fn run_child(&self, mut ctx: StepContext) -> StepOutput {
        let inputs: BTreeMap<String, serde_json::Value> =
            match ctx.binding(&self.binding_key(), &self.spec.inputs) {
                Ok(inputs) => inputs,
                Err(err) => return (ctx, Err(err)),
            };

        let (child, entrypoint, entry_name) = match self.prepare(&ctx, &inputs).await {
            Ok(prepared) => prepared,
            Err(err) => return (ctx, Err(err)),
        };

        let span = info_span!("inherit", step = %self.step, pipeline = %self.spec.pipeline);
        let (done, result) = entrypoint(child).instrument(span).await;

        ctx.envs.extend(done.envs);
        ctx.secrets.extend(done.secrets);
        if let Some(entry) = done.steps.get(&entry_name) {
            ctx.output_vars
                .extend(entry.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        ctx.steps.extend(
            done.steps
                .into_iter()
                .map(|(name, entry)| (suffix_name(&name, &self.step), entry)),
        );
        ctx.containers.extend(
            done.containers
                .into_iter()
                .map(|(name, status)| (suffix_name(&name, &self.step), status)),
        );

        (ctx, result)
    }

    async fn prepare(
        &self,
        ctx: &StepContext,
        inputs: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(StepContext, Next, String), StepError> {
        let spec = self.engine.lookup().lookup(&self.spec.pipeline).await?;
        let pipeline = self.engine.build(&spec)?;

        let mut supplied = HashMap::with_capacity(inputs.len());
        for (name, value) in inputs {
            let value = ParamValue::from_json(value).ok_or_else(|| {
                PipelineValidationError::invalid_input(name, format!("unsupported value {value}"))
            })?;
            supplied.insert(name.clone(), value);
        }
        let inputs = parse_inputs(&spec.inputs, &supplied)?;

        let step = pipeline.entrypoint(self.spec.entrypoint.as_deref())?;
        let entrypoint = step.entrypoint()?;

        let mut child = ctx.deep_copy();
        child.name_prefix = prefix_name(&self.step, &ctx.name_prefix);
        child.inputs = inputs;
        child.steps.clear();
        child.containers.clear();
        child.output_vars.clear();
        child.bindings.clear();
        child.scope = Arc::new(RunScope::new());
        child.with_tag(Tag::new("pipeline", &self.spec.pipeline));

        Ok((child, entrypoint, step.name().to_string()))
    }
}

impl std::fmt::Debug for Inherit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inherit")
            .field("step", &self.step)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl Interceptor for Inherit {
    fn name(&self) -> &'static str {
        "inherit"
    }

    fn priority(&self) -> i32 {
        priority::INHERIT
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }

    fn late_binding(&self) -> Option<LateBinding> {
        if self.spec.inputs.is_empty() {
            return None;
        }
        let document = serde_json::to_value(&self.spec.inputs).ok()?;
        Some(LateBinding::new(self.binding_key(), document))
    }
}
