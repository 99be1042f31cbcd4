//! The immutable step graph.

use crate::errors::{PipelineValidationError, StepError};
use crate::interceptors::{InterceptorChain, Next};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// A named set of steps, each compiled from its own interceptor chain.
///
/// A chain is built the first time its step is resolved, or by
/// [`Pipeline::validate`], and the continuation is kept for every later
/// resolution. Interceptors that reference other steps therefore always see
/// the complete graph.
pub struct Pipeline {
    id: String,
    name: String,
    entrypoint: Option<String>,
    steps: Vec<(String, InterceptorChain)>,
    built: Vec<OnceLock<Next>>,
    acyclic: OnceLock<Result<(), PipelineValidationError>>,
    index: HashMap<String, usize>,
}

/// A random lowercase alphanumeric string of `len` characters.
pub(crate) fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

impl Pipeline {
    /// Creates an empty pipeline with a random five character id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: random_suffix(5),
            name: name.into(),
            entrypoint: None,
            steps: Vec::new(),
            built: Vec::new(),
            acyclic: OnceLock::new(),
            index: HashMap::new(),
        }
    }

    /// Sets the configured entrypoint.
    #[must_use]
    pub fn with_entrypoint(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.entrypoint = (!name.is_empty()).then_some(name);
        self
    }

    /// Registers a step.
    ///
    /// # Errors
    ///
    /// Returns an error if a step with the same name already exists.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        chain: InterceptorChain,
    ) -> Result<(), PipelineValidationError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(PipelineValidationError::duplicate_step(&name));
        }
        self.index.insert(name.clone(), self.steps.len());
        self.steps.push((name, chain));
        self.built.push(OnceLock::new());
        self.acyclic = OnceLock::new();
        Ok(())
    }

    /// Registers a step, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if a step with the same name already exists.
    pub fn with_step(
        mut self,
        name: impl Into<String>,
        chain: InterceptorChain,
    ) -> Result<Self, PipelineValidationError> {
        self.add_step(name, chain)?;
        Ok(self)
    }

    /// The random id of this pipeline instance.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in declaration order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The interceptor chain of a step.
    #[must_use]
    pub fn chain(&self, name: &str) -> Option<&InterceptorChain> {
        self.index.get(name).map(|&i| &self.steps[i].1)
    }

    /// Resolves a step by name.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::StepNotFound`] if no such step exists.
    pub fn step(self: &Arc<Self>, name: &str) -> Result<Step, StepError> {
        if self.index.contains_key(name) {
            Ok(Step {
                pipeline: Arc::clone(self),
                name: name.to_string(),
            })
        } else {
            Err(StepError::StepNotFound(name.to_string()))
        }
    }

    /// Resolves the entrypoint: `name` when given, otherwise the configured
    /// entrypoint, otherwise the first declared step.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty or the named entrypoint
    /// does not exist.
    pub fn entrypoint(self: &Arc<Self>, name: Option<&str>) -> Result<Step, StepError> {
        let name = name
            .filter(|n| !n.is_empty())
            .or(self.entrypoint.as_deref())
            .or_else(|| self.steps.first().map(|(n, _)| n.as_str()));

        match name {
            Some(name) if self.index.contains_key(name) => self.step(name),
            Some(name) => Err(PipelineValidationError::entrypoint_not_found(name).into()),
            None => Err(PipelineValidationError::empty_pipeline(&self.name).into()),
        }
    }

    /// Rejects reference cycles and builds every step chain, surfacing
    /// build-time errors before a run starts.
    ///
    /// # Errors
    ///
    /// Returns the first cycle found or the first chain build error.
    pub fn validate(self: &Arc<Self>) -> Result<(), StepError> {
        for index in 0..self.steps.len() {
            self.continuation(index)?;
        }
        Ok(())
    }

    fn continuation(self: &Arc<Self>, index: usize) -> Result<Next, StepError> {
        if let Some(next) = self.built[index].get() {
            return Ok(Arc::clone(next));
        }
        self.acyclic.get_or_init(|| self.detect_cycles()).clone()?;
        let next = self.steps[index].1.build(self)?;
        Ok(Arc::clone(self.built[index].get_or_init(|| next)))
    }

    fn detect_cycles(&self) -> Result<(), PipelineValidationError> {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        let mut path = Vec::new();

        for (name, _) in &self.steps {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut stack, &mut path) {
                    return Err(PipelineValidationError::reference_cycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        stack.insert(node);
        path.push(node);

        if let Some(chain) = self.chain(node) {
            for dep in chain.references() {
                if stack.contains(dep) {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, stack, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        stack.remove(node);
        None
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entrypoint", &self.entrypoint)
            .field("steps", &self.steps.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A resolved step of a pipeline.
#[derive(Debug, Clone)]
pub struct Step {
    pipeline: Arc<Pipeline>,
    name: String,
}

impl Step {
    /// The step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pipeline this step belongs to.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The step's continuation. It keeps the pipeline alive for as long as
    /// it is held.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by an interceptor's bootstrap.
    pub fn entrypoint(&self) -> Result<Next, StepError> {
        let Some(&index) = self.pipeline.index.get(&self.name) else {
            return Err(StepError::StepNotFound(self.name.clone()));
        };
        let next = self.pipeline.continuation(index)?;
        let pipeline = Arc::clone(&self.pipeline);
        let entrypoint: Next = Arc::new(move |ctx| {
            let _pipeline = &pipeline;
            next(ctx)
        });
        Ok(entrypoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::And;
    use crate::context::StepContext;
    use crate::interceptors::Interceptor;
    use crate::testing::RecordingInterceptor;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> InterceptorChain {
        InterceptorChain::new().with(Arc::new(RecordingInterceptor::new(name, log.clone())))
    }

    #[derive(Default)]
    struct CountBootstraps(AtomicUsize);

    impl Interceptor for CountBootstraps {
        fn name(&self) -> &'static str {
            "count-bootstraps"
        }

        fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(next)
        }
    }

    #[tokio::test]
    async fn test_chain_is_built_once() {
        let counter = Arc::new(CountBootstraps::default());
        let pipeline = Arc::new(
            Pipeline::new("p")
                .with_step("a", InterceptorChain::new().with(counter.clone()))
                .unwrap(),
        );
        pipeline.validate().unwrap();

        for _ in 0..3 {
            let next = pipeline.step("a").unwrap().entrypoint().unwrap();
            next(StepContext::new("/tmp")).await.1.unwrap();
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let pipeline = Arc::new(
            Pipeline::new("p")
                .with_step(
                    "loop",
                    InterceptorChain::new().with(Arc::new(And::new(vec!["loop".into()]))),
                )
                .unwrap(),
        );

        let err = pipeline.validate().unwrap_err();
        assert_eq!(err.to_string(), "reference cycle: loop -> loop");
        assert!(pipeline.step("loop").unwrap().entrypoint().is_err());
    }

    #[tokio::test]
    async fn test_entrypoint_keeps_pipeline_alive() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let next = {
            let pipeline = Arc::new(
                Pipeline::new("p")
                    .with_step(
                        "all",
                        InterceptorChain::new().with(Arc::new(And::new(vec!["b".into()]))),
                    )
                    .unwrap()
                    .with_step("b", recording("b", &log))
                    .unwrap(),
            );
            pipeline.step("all").unwrap().entrypoint().unwrap()
        };

        next(StepContext::new("/tmp")).await.1.unwrap();
        assert_eq!(*log.lock(), vec!["pre b", "post b"]);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut pipeline = Pipeline::new("p");
        pipeline.add_step("a", InterceptorChain::new()).unwrap();
        let err = pipeline.add_step("a", InterceptorChain::new()).unwrap_err();
        assert_eq!(err.to_string(), "step already exists: a");
    }

    #[test]
    fn test_unknown_step() {
        let pipeline = Arc::new(Pipeline::new("p"));
        let err = pipeline.step("missing").unwrap_err();
        assert_eq!(err.to_string(), "no such step found: missing");
    }

    #[test]
    fn test_entrypoint_defaults() {
        let pipeline = Arc::new(
            Pipeline::new("p")
                .with_step("first", InterceptorChain::new())
                .unwrap()
                .with_step("second", InterceptorChain::new())
                .unwrap(),
        );
        assert_eq!(pipeline.entrypoint(None).unwrap().name(), "first");
        assert_eq!(pipeline.entrypoint(Some("")).unwrap().name(), "first");
        assert_eq!(pipeline.entrypoint(Some("second")).unwrap().name(), "second");
        assert!(pipeline.entrypoint(Some("third")).is_err());

        let configured = Arc::new(
            Pipeline::new("p")
                .with_entrypoint("second")
                .with_step("first", InterceptorChain::new())
                .unwrap()
                .with_step("second", InterceptorChain::new())
                .unwrap(),
        );
        assert_eq!(configured.entrypoint(None).unwrap().name(), "second");
    }

    #[test]
    fn test_empty_pipeline_has_no_entrypoint() {
        let pipeline = Arc::new(Pipeline::new("empty"));
        let err = pipeline.entrypoint(None).unwrap_err();
        assert_eq!(err.to_string(), "pipeline `empty` has no steps");
    }

    #[tokio::test]
    async fn test_step_entrypoint_runs_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Arc::new(
            Pipeline::new("p")
                .with_step("a", recording("a", &log))
                .unwrap()
                .with_step("b", recording("b", &log))
                .unwrap(),
        );
        pipeline.validate().unwrap();

        let next = pipeline.step("b").unwrap().entrypoint().unwrap();
        next(StepContext::new("/tmp")).await.1.unwrap();
        assert_eq!(*log.lock(), vec!["pre b", "post b"]);
        assert_eq!(pipeline.id().len(), 5);
    }
}
