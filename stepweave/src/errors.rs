//! Error types for the stepweave engine.
//!
//! Every outcome a step can produce is a variant of [`StepError`]. The
//! abort/skip classification and the outcome label are exhaustive matches over
//! those variants instead of capability checks on opaque errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The error type threaded through every step continuation.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// An `if` condition evaluated to false.
    #[error("conditional step skipped")]
    ConditionFalse,

    /// The ledger already marks the step as done.
    #[error("skip step marked as done")]
    SkipDone,

    /// The step is in the caller-supplied deny-list.
    #[error("skip blacklisted step")]
    SkipBlacklist,

    /// A step failed but is allowed to.
    #[error("ignore error returned from step: {0}")]
    AllowFailure(Box<StepError>),

    /// The step exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The surrounding run was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Matrix parameters expanded to zero combinations.
    #[error("empty matrix")]
    EmptyMatrix,

    /// A step failure wrapped with the step name.
    #[error("step {step} failed: {source}")]
    Step {
        /// The failing step.
        step: String,
        /// The underlying error.
        #[source]
        source: Box<StepError>,
    },

    /// A panic recovered at the step boundary.
    #[error("panic in step `{step}`: {payload}")]
    Panic {
        /// The step that panicked.
        step: String,
        /// The panic payload rendered as text.
        payload: String,
    },

    /// A container created for the step failed.
    #[error("container {pod} failed: {source}")]
    Container {
        /// The pod name.
        pod: String,
        /// The driver error.
        #[source]
        source: DriverError,
    },

    /// Several concurrent branches failed.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<StepError>),

    /// A referenced step does not exist.
    #[error("no such step found: {0}")]
    StepNotFound(String),

    /// Token or expression substitution failed.
    #[error("substitution failed: {0}")]
    Expression(#[from] ExpressionError),

    /// A variables file could not be parsed.
    #[error("failed to parse variables file {path}: {message}")]
    Variables {
        /// The file path.
        path: String,
        /// The parser message.
        message: String,
    },

    /// Building a pipeline or step chain failed.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Resolving an inherited pipeline failed.
    #[error("{0}")]
    Lookup(#[from] LookupError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_messages(errors: &[StepError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl StepError {
    /// Wraps an error with the name of the step that produced it.
    #[must_use]
    pub fn step(step: impl Into<String>, source: Self) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Joins branch errors. Returns `None` for an empty list and the error
    /// itself for a single entry.
    #[must_use]
    pub fn join(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Whether this error must stop the enclosing composition.
    #[must_use]
    pub fn abort_on_error(&self) -> bool {
        match self {
            Self::ConditionFalse | Self::SkipDone | Self::SkipBlacklist | Self::AllowFailure(_) => {
                false
            }
            Self::Step { source, .. } => source.abort_on_error(),
            Self::Multiple(errors) => errors.iter().any(Self::abort_on_error),
            Self::Timeout
            | Self::Cancelled(_)
            | Self::EmptyMatrix
            | Self::Panic { .. }
            | Self::Container { .. }
            | Self::StepNotFound(_)
            | Self::Expression(_)
            | Self::Variables { .. }
            | Self::Validation(_)
            | Self::Lookup(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => true,
        }
    }

    /// The outcome label used for reporting.
    #[must_use]
    pub fn outcome(&self) -> StepOutcome {
        match self {
            Self::ConditionFalse => StepOutcome::SkippedCondition,
            Self::SkipDone => StepOutcome::SkippedDone,
            Self::SkipBlacklist => StepOutcome::SkippedBlacklist,
            Self::AllowFailure(_) => StepOutcome::AllowFailure,
            Self::Step { source, .. } => source.outcome(),
            Self::Multiple(errors) => {
                if errors.iter().any(Self::abort_on_error) {
                    StepOutcome::Error
                } else {
                    errors.first().map_or(StepOutcome::Success, Self::outcome)
                }
            }
            Self::Timeout
            | Self::Cancelled(_)
            | Self::EmptyMatrix
            | Self::Panic { .. }
            | Self::Container { .. }
            | Self::StepNotFound(_)
            | Self::Expression(_)
            | Self::Variables { .. }
            | Self::Validation(_)
            | Self::Lookup(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => StepOutcome::Error,
        }
    }

    /// The exit code of the process that caused this error, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Container {
                source: DriverError::Exit { code },
                ..
            } => Some(*code),
            Self::Step { source, .. } => source.exit_code(),
            Self::AllowFailure(inner) => inner.exit_code(),
            Self::Multiple(errors) => errors.iter().find_map(Self::exit_code),
            _ => None,
        }
    }

    /// Whether the error originates from cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Step { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the error is one of the skip sentinels.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        match self {
            Self::ConditionFalse | Self::SkipDone | Self::SkipBlacklist => true,
            Self::Step { source, .. } => source.is_skip(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Machine-readable outcome of a step, used for logs, events and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
    /// The step completed without error.
    Success,
    /// The step failed but was allowed to.
    AllowFailure,
    /// The step was skipped by a false condition.
    SkippedCondition,
    /// The step was skipped because it already ran.
    SkippedDone,
    /// The step was skipped because it is deny-listed.
    SkippedBlacklist,
    /// The step failed.
    Error,
}

impl StepOutcome {
    /// Derives the outcome of a continuation result.
    #[must_use]
    pub fn of(result: &Result<(), StepError>) -> Self {
        result.as_ref().err().map_or(Self::Success, StepError::outcome)
    }

    /// Returns the label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AllowFailure => "allow-failure",
            Self::SkippedCondition => "skipped-condition",
            Self::SkippedDone => "skipped-done",
            Self::SkippedBlacklist => "skipped-blacklist",
            Self::Error => "error",
        }
    }

    /// Whether the step was skipped without running.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedCondition | Self::SkippedDone | Self::SkippedBlacklist
        )
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a [`Driver`](crate::driver::Driver).
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The container exited with a non-zero status.
    #[error("exited with code {code}")]
    Exit {
        /// The exit status.
        code: i32,
    },

    /// The pod is unknown to the driver.
    #[error("pod {0} not found")]
    NotFound(String),

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Errors reported while resolving a pipeline reference.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// The resolver does not know the reference.
    #[error("pipeline {reference:?} not found")]
    NotFound {
        /// The reference.
        reference: String,
    },

    /// The pipeline definition could not be decoded.
    #[error("failed to decode pipeline {reference:?}: {message}")]
    Decode {
        /// The reference.
        reference: String,
        /// The decoder message.
        message: String,
    },

    /// Every resolver of a chain failed.
    #[error("could not lookup ref: {reference:?}: {}", join_lookup(.errors))]
    Exhausted {
        /// The reference.
        reference: String,
        /// One error per resolver.
        errors: Vec<LookupError>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),
}

fn join_lookup(errors: &[LookupError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors of the token and expression substitution layer.
#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    /// The expression does not compile.
    #[error("failed to compile expression `{expression}`: {message}")]
    Compile {
        /// The expression source.
        expression: String,
        /// The compiler message.
        message: String,
    },

    /// The expression failed at evaluation time.
    #[error("failed to evaluate expression `{expression}`: {message}")]
    Evaluate {
        /// The expression source.
        expression: String,
        /// The evaluator message.
        message: String,
    },

    /// A condition did not produce a boolean.
    #[error("expression `{expression}` must evaluate to a boolean, got {found}")]
    NotBoolean {
        /// The expression source.
        expression: String,
        /// The kind of value produced.
        found: String,
    },
}

/// Metadata about a validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-001-DUPLICATE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline or one of its step chains cannot be built.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// A step name was registered twice.
    #[must_use]
    pub fn duplicate_step(name: &str) -> Self {
        Self::new(format!("step already exists: {name}"))
            .with_steps(vec![name.to_string()])
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-001-DUPLICATE", "Step names must be unique")
                    .with_fix_hint("Rename one of the steps."),
            )
    }

    /// A step references a step that does not exist.
    #[must_use]
    pub fn unknown_step(name: &str) -> Self {
        Self::new(format!("no such step found: {name}"))
            .with_steps(vec![name.to_string()])
            .with_error_info(ContractErrorInfo::new(
                "PIPELINE-002-UNKNOWN-STEP",
                "Referenced step is not declared",
            ))
    }

    /// The requested entrypoint does not exist.
    #[must_use]
    pub fn entrypoint_not_found(name: &str) -> Self {
        Self::new(format!("entrypoint not found: {name}"))
            .with_steps(vec![name.to_string()])
            .with_error_info(ContractErrorInfo::new(
                "PIPELINE-003-ENTRYPOINT",
                "Entrypoint is not a declared step",
            ))
    }

    /// The pipeline declares no steps.
    #[must_use]
    pub fn empty_pipeline(name: &str) -> Self {
        Self::new(format!("pipeline `{name}` has no steps")).with_error_info(
            ContractErrorInfo::new("PIPELINE-004-EMPTY", "Pipeline has no steps")
                .with_fix_hint("Declare at least one step."),
        )
    }

    /// A pipeline input is missing or malformed.
    #[must_use]
    pub fn invalid_input(name: &str, reason: impl fmt::Display) -> Self {
        Self::new(format!("invalid input `{name}`: {reason}")).with_error_info(
            ContractErrorInfo::new("PIPELINE-005-INPUT", "Pipeline input rejected")
                .with_context_entry("input", name),
        )
    }

    /// Steps reference each other in a loop.
    #[must_use]
    pub fn reference_cycle(path: Vec<String>) -> Self {
        Self::new(format!("reference cycle: {}", path.join(" -> ")))
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-007-CYCLE", "Steps reference each other in a loop")
                    .with_fix_hint("Remove one of the references in the cycle to break it."),
            )
            .with_steps(path)
    }

    /// An expression in a step failed to compile.
    #[must_use]
    pub fn expression(step: &str, err: &ExpressionError) -> Self {
        Self::new(format!("step {step}: {err}"))
            .with_steps(vec![step.to_string()])
            .with_error_info(ContractErrorInfo::new(
                "PIPELINE-006-EXPRESSION",
                "Expression does not compile",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_do_not_abort() {
        assert!(!StepError::ConditionFalse.abort_on_error());
        assert!(!StepError::SkipDone.abort_on_error());
        assert!(!StepError::SkipBlacklist.abort_on_error());
        assert!(!StepError::AllowFailure(Box::new(StepError::Timeout)).abort_on_error());
        assert!(StepError::Timeout.abort_on_error());
        assert!(StepError::Internal("boom".into()).abort_on_error());
    }

    #[test]
    fn test_classification_unwraps_step_wrapper() {
        let err = StepError::step("build", StepError::ConditionFalse);
        assert!(!err.abort_on_error());
        assert_eq!(err.outcome(), StepOutcome::SkippedCondition);
        assert_eq!(err.to_string(), "step build failed: conditional step skipped");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(StepOutcome::of(&Ok(())).as_str(), "success");
        assert_eq!(
            StepOutcome::of(&Err(StepError::AllowFailure(Box::new(StepError::Timeout)))).as_str(),
            "allow-failure"
        );
        assert_eq!(StepError::SkipDone.outcome().as_str(), "skipped-done");
        assert_eq!(StepError::EmptyMatrix.outcome().as_str(), "error");
    }

    #[test]
    fn test_join() {
        assert!(StepError::join(vec![]).is_none());
        assert!(matches!(
            StepError::join(vec![StepError::Timeout]),
            Some(StepError::Timeout)
        ));

        let joined = StepError::join(vec![StepError::SkipDone, StepError::Timeout]);
        let joined = joined.unwrap_or(StepError::Internal("missing".into()));
        assert!(joined.abort_on_error());
        assert_eq!(joined.to_string(), "skip step marked as done\noperation timed out");
    }

    #[test]
    fn test_exit_code_through_wrappers() {
        let err = StepError::step(
            "test",
            StepError::AllowFailure(Box::new(StepError::Container {
                pod: "test-abc".into(),
                source: DriverError::Exit { code: 3 },
            })),
        );
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(StepError::Timeout.exit_code(), None);
    }

    #[test]
    fn test_lookup_exhausted_message() {
        let err = LookupError::Exhausted {
            reference: "build".into(),
            errors: vec![
                LookupError::NotFound {
                    reference: "build".into(),
                },
                LookupError::Io("permission denied".into()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "could not lookup ref: \"build\": pipeline \"build\" not found; IO error: permission denied"
        );
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            PipelineValidationError::duplicate_step("a").to_string(),
            "step already exists: a"
        );
        let err = PipelineValidationError::entrypoint_not_found("main");
        assert_eq!(err.to_string(), "entrypoint not found: main");
        assert_eq!(
            err.error_info.map(|info| info.code),
            Some("PIPELINE-003-ENTRYPOINT".to_string())
        );

        let err = PipelineValidationError::reference_cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "reference cycle: a -> b -> a");
        assert_eq!(err.steps, vec!["a", "b", "a"]);
    }
}
