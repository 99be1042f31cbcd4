//! Assembly of step chains from specifications.

use super::{Executable, Pipeline, PipelineSpec, StepSpec};
use crate::cancellation::TeardownRegistry;
use crate::composition::{And, Concurrent, Inherit, Matrix, Needs, Pipe};
use crate::config::EngineConfig;
use crate::context::Tag;
use crate::driver::Driver;
use crate::errors::StepError;
use crate::events::{EventSink, NoOpEventSink};
use crate::expressions::ExpressionEngine;
use crate::interceptors::{
    AllowFailure, ApplyTemplate, EnvVars, GarbageCollector, If, InputVars, InterceptorChain,
    Ledger, Logger, OutputVars, Recover, Report, Retry, Run, SecretVars, SkipBlacklist, SkipDone,
    StdioRedirect, Substitute, Tags, Timeout, TmpDir,
};
use crate::lookup::{LookupChain, PipelineLookup};
use crate::mask::SecretStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds pipelines from specifications.
///
/// An engine is cheap to clone; clones share the driver, the lookup, the
/// secret store and the teardown queue, so nested pipelines built by
/// inheritance are torn down with their parent.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    driver: Arc<dyn Driver>,
    lookup: Arc<dyn PipelineLookup>,
    sink: Arc<dyn EventSink>,
    expressions: Arc<ExpressionEngine>,
    secrets: Arc<SecretStore>,
    teardown: Arc<TeardownRegistry>,
    host_env: Arc<HashMap<String, String>>,
}

impl Engine {
    /// Creates an engine running containers on `driver`.
    #[must_use]
    pub fn new(config: EngineConfig, driver: Arc<dyn Driver>) -> Self {
        let host_env = if config.pass_host_env {
            std::env::vars().collect()
        } else {
            HashMap::new()
        };

        Self {
            config: Arc::new(config),
            driver,
            lookup: Arc::new(LookupChain::new()),
            sink: Arc::new(NoOpEventSink),
            expressions: Arc::new(ExpressionEngine::new()),
            secrets: Arc::new(SecretStore::new()),
            teardown: Arc::new(TeardownRegistry::new()),
            host_env: Arc::new(host_env),
        }
    }

    /// Sets the resolver used by inheritance.
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<dyn PipelineLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the host environment visible to steps.
    #[must_use]
    pub fn with_host_env(mut self, env: HashMap<String, String>) -> Self {
        self.host_env = Arc::new(env);
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The resolver used by inheritance.
    #[must_use]
    pub fn lookup(&self) -> &Arc<dyn PipelineLookup> {
        &self.lookup
    }

    /// The shared expression engine.
    #[must_use]
    pub fn expressions(&self) -> &Arc<ExpressionEngine> {
        &self.expressions
    }

    /// The store masking secrets in container output.
    #[must_use]
    pub fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    /// The teardown queue.
    #[must_use]
    pub fn teardown(&self) -> &Arc<TeardownRegistry> {
        &self.teardown
    }

    /// Builds and validates a pipeline.
    pub fn build(&self, spec: &PipelineSpec) -> Result<Arc<Pipeline>, StepError> {
        spec.validate()?;

        let mut pipeline = Pipeline::new(&spec.name);
        if let Some(entrypoint) = &spec.entrypoint {
            pipeline = pipeline.with_entrypoint(entrypoint);
        }
        for step in &spec.steps {
            pipeline.add_step(&step.name, self.chain(step))?;
        }

        let pipeline = Arc::new(pipeline);
        pipeline.validate()?;
        debug!(pipeline = %spec.name, id = %pipeline.id(), steps = pipeline.len(), "pipeline built");
        Ok(pipeline)
    }

    /// Builds a pipeline and wraps it for execution.
    pub fn executable(&self, spec: PipelineSpec) -> Result<Executable, StepError> {
        let pipeline = self.build(&spec)?;
        Ok(Executable::new(self.clone(), spec, pipeline))
    }

    /// Assembles the interceptor chain of one step.
    #[must_use]
    pub fn chain(&self, step: &StepSpec) -> InterceptorChain {
        let name = step.name.as_str();
        let config = &*self.config;
        let mut chain = InterceptorChain::new()
            .with(Arc::new(Recover::new(name)))
            .with(Arc::new(Logger::new(name)))
            .with(Arc::new(Report::new(name, Arc::clone(&self.sink))))
            .with(Arc::new(Ledger::new(name)))
            .with(Arc::new(Tags::new(self.tags(step))))
            .with(Arc::new(EnvVars::new(
                step.env.clone(),
                config.envs.clone(),
                (*self.host_env).clone(),
                Arc::clone(&self.expressions),
            )))
            .with(Arc::new(SecretVars::new(
                step.secrets.clone(),
                (*self.host_env).clone(),
                Arc::clone(&self.expressions),
                Arc::clone(&self.secrets),
            )))
            .with(Arc::new(ApplyTemplate::new(
                config.template.clone(),
                step.template.clone(),
            )))
            .with(Arc::new(TmpDir::new(name)));

        if config.skip_done {
            chain.add(Arc::new(SkipDone::new(name)));
        }
        if let Some(retry) = &step.retry {
            chain.add(Arc::new(Retry::from_spec(name, retry)));
        }
        if !step.inputs.is_empty() {
            chain.add(Arc::new(InputVars::new(
                step.inputs.clone(),
                Arc::clone(&self.expressions),
            )));
        }
        if !step.outputs.is_empty() {
            chain.add(Arc::new(OutputVars::new(
                step.outputs.iter().map(|o| o.name.clone()),
            )));
        }
        if let Some(matrix) = &step.matrix {
            chain.add(Arc::new(
                Matrix::new(name, matrix.clone(), Arc::clone(&self.expressions))
                    .with_max_concurrent(config.max_concurrent),
            ));
        }
        if !config.skip_steps.is_empty() {
            chain.add(Arc::new(SkipBlacklist::new(name, config.skip_steps.clone())));
        }
        if step.run.is_some() && !config.no_gc {
            chain.add(Arc::new(GarbageCollector::new(
                name,
                Arc::clone(&self.driver),
                self.teardown.sender(),
            )));
        }
        if step.allow_failure {
            chain.add(Arc::new(AllowFailure::new(name)));
        }
        if let Some(timeout) = step.timeout() {
            chain.add(Arc::new(Timeout::new(name, timeout)));
        }
        if !step.conditions.is_empty() {
            chain.add(Arc::new(If::new(
                name,
                step.conditions.clone(),
                Arc::clone(&self.expressions),
            )));
        }
        if !step.needs.is_empty() {
            chain.add(Arc::new(Needs::new(step.needs.clone())));
        }
        if let Some(streams) = &step.streams {
            chain.add(Arc::new(StdioRedirect::new(name, streams.clone(), config.tee)));
        }
        if let Some(run) = &step.run {
            let mut runner = Run::new(name, run.clone(), Arc::clone(&self.driver))
                .with_tee(config.tee)
                .with_secrets(Arc::clone(&self.secrets));
            // Pods kept alive by no_gc would hold teardown until the grace period.
            if !config.no_gc {
                runner = runner.with_teardown(self.teardown.sender());
            }
            chain.add(Arc::new(runner));
        }
        if let Some(inherit) = &step.inherit {
            chain.add(Arc::new(Inherit::new(name, inherit.clone(), self.clone())));
        }
        if let Some(and) = &step.and {
            chain.add(Arc::new(And::new(and.refs.clone())));
        }
        if let Some(concurrent) = &step.concurrent {
            chain.add(Arc::new(Concurrent::new(
                concurrent.clone(),
                config.max_concurrent,
            )));
        }
        if let Some(pipe) = &step.pipe {
            let mut pipe = pipe.clone();
            pipe.tee |= config.tee;
            chain.add(Arc::new(Pipe::new(pipe)));
        }

        let bindings = chain.late_bindings();
        if !bindings.is_empty() {
            chain.add(Arc::new(Substitute::new(
                bindings,
                step.matrix.is_some(),
                Arc::clone(&self.expressions),
            )));
        }
        chain
    }

    fn tags(&self, step: &StepSpec) -> Vec<Tag> {
        let global = self.config.tags.iter().cloned();
        let local = step.tags.iter().map(|t| {
            let tag = Tag::new(&t.key, &t.value);
            match &t.color {
                Some(color) => tag.with_color(color),
                None => tag,
            }
        });
        global.chain(local).collect()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
