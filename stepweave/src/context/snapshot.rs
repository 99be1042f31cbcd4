//! The persisted form of a context, written as `context.json`.

use super::{ParamValue, StepContext, StepResult, Tag};
use crate::driver::ContainerStatus;
use crate::errors::StepError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// File name of the snapshot inside a context directory.
pub const SNAPSHOT_FILE: &str = "context.json";

/// Serializable snapshot of a context. Secrets are never included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// Input values.
    #[serde(default)]
    pub inputs: HashMap<String, ParamValue>,
    /// Environment variables.
    #[serde(default)]
    pub envs: HashMap<String, String>,
    /// Matrix bindings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matrix: BTreeMap<String, String>,
    /// The execution ledger.
    #[serde(default)]
    pub steps: HashMap<String, StepResult>,
    /// Container handles.
    #[serde(default)]
    pub containers: HashMap<String, ContainerStatus>,
    /// Tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl ContextSnapshot {
    /// Captures a context.
    #[must_use]
    pub fn capture(ctx: &StepContext) -> Self {
        Self {
            inputs: ctx.inputs.clone(),
            envs: ctx.envs.clone(),
            matrix: ctx.matrix.clone(),
            steps: ctx.steps.clone(),
            containers: ctx.containers.clone(),
            tags: ctx.tags.clone(),
        }
    }

    /// Folds a recovered snapshot into a fresh context. Values of the fresh
    /// context win over recovered ones.
    pub fn restore_into(self, ctx: &mut StepContext) {
        for (name, result) in self.steps {
            ctx.steps.entry(name).or_insert(result);
        }
        for (name, container) in self.containers {
            ctx.containers.entry(name).or_insert(container);
        }
        for (key, value) in self.envs {
            ctx.envs.entry(key).or_insert(value);
        }
        for (key, value) in self.inputs {
            ctx.inputs.entry(key).or_insert(value);
        }
    }

    /// Writes the snapshot to `<dir>/context.json`.
    pub async fn store(&self, dir: &Path) -> Result<(), StepError> {
        let path = dir.join(SNAPSHOT_FILE);
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "context stored");
        Ok(())
    }

    /// Reads `<dir>/context.json`, if present.
    pub async fn load(dir: &Path) -> Result<Option<Self>, StepError> {
        let path = dir.join(SNAPSHOT_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), "recovering context");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
