use crate::errors::StepOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEventKind {
    /// The step started.
    Started,
    /// The step completed, successfully or with a tolerated failure.
    Completed,
    /// The step failed.
    Failed,
    /// The step was skipped.
    Skipped,
}

impl StepEventKind {
    /// The dotted event type, e.g. `step.started`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "step.started",
            Self::Completed => "step.completed",
            Self::Failed => "step.failed",
            Self::Skipped => "step.skipped",
        }
    }

    /// The terminal event kind for an outcome.
    #[must_use]
    pub const fn finished(outcome: StepOutcome) -> Self {
        match outcome {
            StepOutcome::Success | StepOutcome::AllowFailure => Self::Completed,
            StepOutcome::SkippedCondition
            | StepOutcome::SkippedDone
            | StepOutcome::SkippedBlacklist => Self::Skipped,
            StepOutcome::Error => Self::Failed,
        }
    }
}

impl fmt::Display for StepEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Event kind.
    pub kind: StepEventKind,
    /// Step name.
    pub step: String,
    /// Name prefix of the executing lineage (matrix branch, inherited
    /// pipeline).
    pub prefix: String,
    /// Pipeline name.
    pub pipeline: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Outcome label, for terminal events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
    /// Run time in milliseconds, for terminal events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error text, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tags attached to the step.
    #[serde(default)]
    pub tags: Vec<(String, String)>,
}

impl StepEvent {
    /// Creates a `step.started` event.
    #[must_use]
    pub fn started(step: &str, prefix: &str, pipeline: &str) -> Self {
        Self {
            kind: StepEventKind::Started,
            step: step.to_string(),
            prefix: prefix.to_string(),
            pipeline: pipeline.to_string(),
            timestamp: Utc::now(),
            outcome: None,
            duration_ms: None,
            error: None,
            tags: Vec::new(),
        }
    }

    /// Turns a started event into the matching terminal event.
    #[must_use]
    pub fn finish(&self, outcome: StepOutcome, error: Option<String>) -> Self {
        let now = Utc::now();
        let elapsed = (now - self.timestamp).num_milliseconds();
        Self {
            kind: StepEventKind::finished(outcome),
            timestamp: now,
            outcome: Some(outcome),
            duration_ms: Some(u64::try_from(elapsed).unwrap_or(0)),
            error,
            ..self.clone()
        }
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<(String, String)>) -> Self {
        self.tags = tags;
        self
    }

    /// The dotted event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}
