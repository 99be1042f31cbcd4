//! Ledger entries recorded for every executed step.

use super::ParamValue;
use crate::errors::{StepError, StepOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// The ledger entry of a single step execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// When the step started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step ended. Unset while the step is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Outputs captured from the step's variables files.
    #[serde(default)]
    pub outputs: HashMap<String, ParamValue>,
    /// Terminal error message, if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Outcome label of the terminal result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
    /// The step's scratch directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StepResult {
    /// Creates an entry for a step starting now.
    #[must_use]
    pub fn started() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Seals the entry with the end time and the continuation result.
    pub fn seal(&mut self, result: &Result<(), StepError>) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(StepOutcome::of(result));
        self.error = result.as_ref().err().map(ToString::to_string);
    }

    /// Whether the entry was sealed without error.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.ended_at.is_some() && self.error.is_none()
    }

    /// Whether the entry carries an error but was never sealed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.ended_at.is_none() && self.error.is_some()
    }

    /// Wall-clock duration, once sealed.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_success() {
        let mut result = StepResult::started();
        assert!(!result.is_completed());

        result.seal(&Ok(()));
        assert!(result.is_completed());
        assert_eq!(result.outcome, Some(StepOutcome::Success));
        assert!(result.duration().is_some());
    }

    #[test]
    fn test_seal_error_keeps_message() {
        let mut result = StepResult::started();
        result.seal(&Err(StepError::Timeout));

        assert!(!result.is_completed());
        assert_eq!(result.error.as_deref(), Some("operation timed out"));
        assert_eq!(result.outcome, Some(StepOutcome::Error));
    }

    #[test]
    fn test_interrupted() {
        let result = StepResult {
            error: Some("killed".into()),
            ..StepResult::default()
        };
        assert!(result.is_interrupted());
    }
}
