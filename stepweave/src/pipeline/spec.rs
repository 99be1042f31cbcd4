//! Declarative pipeline and step specifications.

use crate::context::{ParamValue, Template};
use crate::errors::{PipelineValidationError, StepError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Specification for an entire pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    /// The pipeline name.
    #[serde(default)]
    pub name: String,
    /// Step run when no entrypoint is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Declared pipeline inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputSpec>,
    /// Steps in declaration order.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl PipelineSpec {
    /// Creates an empty specification.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the entrypoint.
    #[must_use]
    pub fn with_entrypoint(mut self, name: impl Into<String>) -> Self {
        self.entrypoint = Some(name.into());
        self
    }

    /// Declares an input.
    #[must_use]
    pub fn with_input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// Parses a specification from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid specification.
    pub fn from_json(raw: &str) -> Result<Self, StepError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads a specification from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, StepError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    /// Checks step names and references.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty pipeline, a duplicate step name or a
    /// reference to an undeclared step.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.steps.is_empty() {
            return Err(PipelineValidationError::empty_pipeline(&self.name));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(PipelineValidationError::duplicate_step(&step.name));
            }
        }

        for step in &self.steps {
            if let Some(missing) = step.references().find(|r| !names.contains(r)) {
                return Err(PipelineValidationError::unknown_step(missing)
                    .with_steps(vec![step.name.clone(), missing.to_string()]));
            }
        }

        if let Some(entrypoint) = self.entrypoint.as_deref().filter(|e| !e.is_empty()) {
            if !names.contains(entrypoint) {
                return Err(PipelineValidationError::entrypoint_not_found(entrypoint));
            }
        }

        Ok(())
    }
}

/// Type of a pipeline input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    /// A single string.
    #[default]
    String,
    /// A comma separated list of strings.
    StringSlice,
    /// A boolean.
    Bool,
}

/// A declared pipeline input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    /// Input name.
    pub name: String,
    /// Input type.
    #[serde(rename = "type", default)]
    pub kind: InputType,
    /// JSON default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Whether a value must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputSpec {
    /// Declares an optional input.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: InputType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Marks the input as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Specification for a single step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// The unique name of the step.
    pub name: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Conditions; every one must evaluate to true.
    #[serde(
        rename = "if",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub conditions: Vec<String>,
    /// Deadline for the step in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Tolerate failures of this step.
    #[serde(default)]
    pub allow_failure: bool,
    /// Matrix expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixSpec>,
    /// Steps that must have run before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Stdio redirection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streams: Option<Streams>,
    /// Retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Secret variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<EnvVar>,
    /// Step inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepInput>,
    /// Declared output parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
    /// Tags attached while the step runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagSpec>,
    /// Container defaults for this step and everything below it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    /// Run a container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSpec>,
    /// Run referenced steps in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<RefsSpec>,
    /// Run referenced steps concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<ConcurrentSpec>,
    /// Connect referenced steps stdout to stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe: Option<PipeSpec>,
    /// Run another pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<InheritSpec>,
}

impl StepSpec {
    /// Creates a step with no behavior.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_if(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Tolerates failures.
    #[must_use]
    pub const fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Sets the matrix.
    #[must_use]
    pub fn with_matrix(mut self, matrix: MatrixSpec) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs.extend(needs.into_iter().map(Into::into));
        self
    }

    /// Sets the stdio redirection.
    #[must_use]
    pub fn with_streams(mut self, streams: Streams) -> Self {
        self.streams = Some(streams);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    /// Adds a secret variable.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.push(EnvVar::new(name, value));
        self
    }

    /// Adds a step input.
    #[must_use]
    pub fn with_input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Declares an output parameter.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputSpec { name: name.into() });
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(TagSpec {
            key: key.into(),
            value: value.into(),
            color: None,
        });
        self
    }

    /// Sets the template.
    #[must_use]
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    /// Runs a container.
    #[must_use]
    pub fn with_run(mut self, run: RunSpec) -> Self {
        self.run = Some(run);
        self
    }

    /// Runs steps in order.
    #[must_use]
    pub fn with_and<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.and = Some(RefsSpec::new(refs));
        self
    }

    /// Runs steps concurrently.
    #[must_use]
    pub fn with_concurrent(mut self, concurrent: ConcurrentSpec) -> Self {
        self.concurrent = Some(concurrent);
        self
    }

    /// Pipes steps.
    #[must_use]
    pub fn with_pipe(mut self, pipe: PipeSpec) -> Self {
        self.pipe = Some(pipe);
        self
    }

    /// Inherits a pipeline.
    #[must_use]
    pub fn with_inherit(mut self, inherit: InheritSpec) -> Self {
        self.inherit = Some(inherit);
        self
    }

    /// The timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Names of every step this one references.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        let and = self.and.iter().flat_map(|a| a.refs.iter());
        let concurrent = self.concurrent.iter().flat_map(|c| c.refs.iter());
        let pipe = self.pipe.iter().flat_map(|p| p.refs.iter());
        self.needs
            .iter()
            .chain(and)
            .chain(concurrent)
            .chain(pipe)
            .map(String::as_str)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// An environment or secret variable. Without a value the host variable of
/// the same name is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value, may contain substitutions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl EnvVar {
    /// Creates a variable with a value.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Creates a variable taken from the host environment.
    #[must_use]
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// A step input: an expression document, or a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// Input name.
    pub name: String,
    /// Value document, may contain substitutions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Used when the value is absent or resolves to null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

impl StepInput {
    /// Creates an input from a value document.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            default: None,
        }
    }
}

/// A declared output parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output name.
    pub name: String,
}

/// A tag attached while a step runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
    /// Optional colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Matrix parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSpec {
    /// Each key maps to a single value or a list.
    pub params: BTreeMap<String, ParamValue>,
    /// Groups added to every combination that carries one of their values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<BTreeMap<String, String>>,
    /// Cancel remaining branches after the first aborting failure.
    #[serde(default)]
    pub fail_fast: bool,
}

impl MatrixSpec {
    /// Creates a matrix from parameters.
    #[must_use]
    pub fn new<I, K>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, ParamValue)>,
        K: Into<String>,
    {
        Self {
            params: params.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Self::default()
        }
    }

    /// Adds an include group.
    #[must_use]
    pub fn with_include(mut self, group: BTreeMap<String, String>) -> Self {
        self.include.push(group);
        self
    }

    /// Enables fail-fast.
    #[must_use]
    pub const fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }
}

/// Retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Exponential backoff base in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponential_ms: Option<u64>,
    /// Constant backoff in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant_ms: Option<u64>,
    /// Maximum number of retries; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// A redirected stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    /// File path, may contain substitutions.
    pub path: String,
    /// Append instead of truncating.
    #[serde(default)]
    pub append: bool,
}

impl StreamSpec {
    /// Redirects to a path, truncating.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            append: false,
        }
    }
}

/// Stdio redirection of a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streams {
    /// Read stdin from a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<StreamSpec>,
    /// Write stdout to a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StreamSpec>,
    /// Write stderr to a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<StreamSpec>,
}

/// What a run step waits for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AwaitStatus {
    /// Wait for the container to exit.
    #[default]
    Exit,
    /// Wait until the container is ready, then continue.
    Ready,
}

/// A container invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// Image, falls back to the template.
    #[serde(default)]
    pub image: String,
    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    /// Attach stdin.
    #[serde(default)]
    pub stdin: bool,
    /// Allocate a TTY.
    #[serde(default)]
    pub tty: bool,
    /// What to wait for.
    #[serde(default, rename = "await")]
    pub await_status: AwaitStatus,
}

impl RunSpec {
    /// Creates a run of `image` with arguments.
    #[must_use]
    pub fn new<I, S>(image: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// A list of step references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefsSpec {
    /// Referenced step names.
    pub refs: Vec<String>,
}

impl RefsSpec {
    /// Creates a reference list.
    #[must_use]
    pub fn new<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refs: refs.into_iter().map(Into::into).collect(),
        }
    }
}

/// Concurrent fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrentSpec {
    /// Referenced step names.
    pub refs: Vec<String>,
    /// Cancel remaining branches after the first aborting failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Bound on branches running at once, overriding the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

impl ConcurrentSpec {
    /// Creates a fan-out over `refs`.
    #[must_use]
    pub fn new<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refs: refs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Enables fail-fast.
    #[must_use]
    pub const fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }
}

/// Stream piping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeSpec {
    /// Referenced step names, in pipe order.
    pub refs: Vec<String>,
    /// Copy every step's stdout to the parent stdout as well.
    #[serde(default)]
    pub tee: bool,
}

impl PipeSpec {
    /// Creates a pipe over `refs`.
    #[must_use]
    pub fn new<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refs: refs.into_iter().map(Into::into).collect(),
            tee: false,
        }
    }
}

/// Pipeline inheritance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InheritSpec {
    /// Reference resolved through the lookup chain.
    pub pipeline: String,
    /// Entrypoint of the inherited pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Inputs handed to the inherited pipeline, may contain substitutions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl InheritSpec {
    /// Inherits `pipeline`.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            ..Self::default()
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_step_kinds() {
        let spec = PipelineSpec::from_json(
            r#"{
                "name": "ci",
                "entrypoint": "main",
                "inputs": [{"name": "targets", "type": "string-slice", "default": "a,b"}],
                "steps": [
                    {"name": "main", "concurrent": {"refs": ["lint", "test"], "failFast": true}},
                    {"name": "lint", "if": "${{ context.inputs.targets }}", "run": {"image": "alpine", "args": ["true"]}},
                    {"name": "test", "if": ["true", "false"], "timeoutMs": 500,
                     "retry": {"constantMs": 10, "maxRetries": 2},
                     "matrix": {"params": {"os": ["linux", "darwin"], "v": "1"}},
                     "run": {"image": "alpine", "await": "ready"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.inputs[0].kind, InputType::StringSlice);
        assert!(spec.steps[0].concurrent.as_ref().unwrap().fail_fast);
        assert_eq!(spec.steps[1].conditions.len(), 1);
        assert_eq!(spec.steps[2].conditions, vec!["true", "false"]);
        assert_eq!(spec.steps[2].timeout(), Some(Duration::from_millis(500)));
        assert_eq!(
            spec.steps[2].matrix.as_ref().unwrap().params["os"],
            ParamValue::array(["linux", "darwin"])
        );
        assert_eq!(
            spec.steps[2].run.as_ref().unwrap().await_status,
            AwaitStatus::Ready
        );
        spec.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_reference() {
        let spec = PipelineSpec::new("p").with_step(StepSpec::new("a").with_and(["missing"]));
        let err = spec.validate().unwrap_err();
        assert_eq!(err.to_string(), "no such step found: missing");
        assert_eq!(err.steps, vec!["a", "missing"]);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let spec = PipelineSpec::new("p")
            .with_step(StepSpec::new("a"))
            .with_step(StepSpec::new("a"));
        assert_eq!(
            spec.validate().unwrap_err().to_string(),
            "step already exists: a"
        );
        assert!(PipelineSpec::new("p").validate().is_err());
    }

    #[test]
    fn test_references() {
        let step = StepSpec::new("main")
            .with_needs(["setup"])
            .with_and(["a"])
            .with_pipe(PipeSpec::new(["b", "c"]));
        assert_eq!(step.references().collect::<Vec<_>>(), vec!["setup", "a", "b", "c"]);
    }
}
