//! The execution context threaded through every step continuation.

use super::{merge_template, ParamValue, RunScope, StdioSet, StepResult, Tag, Template};
use crate::cancellation::CancellationToken;
use crate::driver::ContainerStatus;
use crate::errors::StepError;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A declared output parameter and the file the step writes it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputParam {
    /// Output name.
    pub name: String,
    /// Path of the variables file.
    pub path: PathBuf,
}

/// The value passed into and returned from every continuation.
///
/// All maps are owned; cloning (see [`StepContext::deep_copy`]) yields an
/// independent context. Stdio handles, the cancellation token and the run
/// scope are shared between copies.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Working directory of the run.
    pub dir: PathBuf,
    /// Scratch directory of the current step.
    pub data_dir: Option<PathBuf>,
    /// Prefix for step names created inside this lineage.
    pub name_prefix: String,
    /// Input values.
    pub inputs: HashMap<String, ParamValue>,
    /// Environment variables.
    pub envs: HashMap<String, String>,
    /// Secret variables. Never persisted.
    pub secrets: HashMap<String, String>,
    /// Bindings of the current matrix branch. Empty at the root.
    pub matrix: BTreeMap<String, String>,
    /// The execution ledger.
    pub steps: HashMap<String, StepResult>,
    /// Containers created by steps, keyed by step name.
    pub containers: HashMap<String, ContainerStatus>,
    /// Observability tags.
    pub tags: Vec<Tag>,
    /// Inherited container defaults.
    pub template: Option<Template>,
    /// Output values collected for the enclosing step.
    pub output_vars: HashMap<String, ParamValue>,
    /// Environment variables file of the current step.
    pub env_file: Option<PathBuf>,
    /// Secret variables file of the current step.
    pub secret_file: Option<PathBuf>,
    /// Output variables file of the current step.
    pub output_file: Option<PathBuf>,
    /// Declared output parameter files of the current step.
    pub outputs: Vec<OutputParam>,
    /// Late-bound values resolved by the substitution pass.
    pub bindings: HashMap<String, serde_json::Value>,
    /// Stdio surface.
    pub stdio: StdioSet,
    /// Cancellation for this lineage.
    pub cancel: Arc<CancellationToken>,
    /// State shared by the whole run.
    pub scope: Arc<RunScope>,
}

impl StepContext {
    /// Creates a fresh root context.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            data_dir: None,
            name_prefix: String::new(),
            inputs: HashMap::new(),
            envs: HashMap::new(),
            secrets: HashMap::new(),
            matrix: BTreeMap::new(),
            steps: HashMap::new(),
            containers: HashMap::new(),
            tags: Vec::new(),
            template: None,
            output_vars: HashMap::new(),
            env_file: None,
            secret_file: None,
            output_file: None,
            outputs: Vec::new(),
            bindings: HashMap::new(),
            stdio: StdioSet::default(),
            cancel: Arc::new(CancellationToken::new()),
            scope: Arc::new(RunScope::new()),
        }
    }

    /// Sets the inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: HashMap<String, ParamValue>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the stdio surface.
    #[must_use]
    pub fn with_stdio(mut self, stdio: StdioSet) -> Self {
        self.stdio = stdio;
        self
    }

    /// Returns an independent copy. Mutating any map of the copy never
    /// affects `self`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Creates an isolated context for running a dependency: only the
    /// directory, template, stdio and run-wide handles are carried over.
    #[must_use]
    pub fn isolated(&self) -> Self {
        Self {
            template: self.template.clone(),
            stdio: self.stdio.clone(),
            cancel: self.cancel.clone(),
            scope: self.scope.clone(),
            ..Self::new(self.dir.clone())
        }
    }

    /// Folds `other` into `self`: environment, secrets, inputs, ledger and
    /// containers are copied over, the template is merged with the "first
    /// non-empty wins" rule.
    pub fn merge(&mut self, other: &Self) {
        extend(&mut self.envs, &other.envs);
        extend(&mut self.secrets, &other.secrets);
        extend(&mut self.inputs, &other.inputs);
        extend(&mut self.steps, &other.steps);
        extend(&mut self.containers, &other.containers);
        merge_template(&mut self.template, other.template.as_ref());
    }

    /// Captures the mergeable parts of this context.
    #[must_use]
    pub fn delta(&self) -> ContextDelta {
        ContextDelta {
            envs: self.envs.clone(),
            secrets: self.secrets.clone(),
            inputs: self.inputs.clone(),
            steps: self.steps.clone(),
            containers: self.containers.clone(),
            template: self.template.clone(),
        }
    }

    /// Folds a captured delta into `self`, like [`StepContext::merge`].
    pub fn merge_delta(&mut self, delta: &ContextDelta) {
        extend(&mut self.envs, &delta.envs);
        extend(&mut self.secrets, &delta.secrets);
        extend(&mut self.inputs, &delta.inputs);
        extend(&mut self.steps, &delta.steps);
        extend(&mut self.containers, &delta.containers);
        merge_template(&mut self.template, delta.template.as_ref());
    }

    /// Attaches a tag, replacing an existing tag with the same key. Tags
    /// without colour get a stable one assigned.
    pub fn with_tag(&mut self, mut tag: Tag) {
        if tag.color.is_empty() {
            tag.color = super::tag_color(&tag.key, &tag.value);
        }

        match self.tags.iter_mut().find(|t| t.key == tag.key) {
            Some(existing) => *existing = tag,
            None => self.tags.push(tag),
        }
    }

    /// Returns whether a tag with the given key is attached.
    #[must_use]
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }

    /// Returns the directory used for temporary files of the current step.
    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or(&self.dir)
    }

    /// Reads a late-bound value, falling back to `raw` when the substitution
    /// pass did not bind `key`.
    pub fn binding<T: DeserializeOwned + Clone>(&self, key: &str, raw: &T) -> Result<T, StepError> {
        match self.bindings.get(key) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(raw.clone()),
        }
    }
}

/// The mergeable parts of a context, detached from run-wide handles.
#[derive(Debug, Clone, Default)]
pub struct ContextDelta {
    /// Environment variables.
    pub envs: HashMap<String, String>,
    /// Secret variables.
    pub secrets: HashMap<String, String>,
    /// Input values.
    pub inputs: HashMap<String, ParamValue>,
    /// Ledger entries.
    pub steps: HashMap<String, StepResult>,
    /// Container handles.
    pub containers: HashMap<String, ContainerStatus>,
    /// Container defaults.
    pub template: Option<Template>,
}

fn extend<V: Clone>(into: &mut HashMap<String, V>, from: &HashMap<String, V>) {
    into.extend(from.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Prefixes a step name: `prefix-name`, or `name` without prefix.
#[must_use]
pub fn prefix_name(name: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}-{name}")
    }
}

/// Suffixes a step name: `name-suffix`, or `name` without suffix.
#[must_use]
pub fn suffix_name(name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        name.to_string()
    } else {
        format!("{name}-{suffix}")
    }
}
