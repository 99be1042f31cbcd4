//! Container defaults inherited down the step graph.

use serde::{Deserialize, Serialize};

/// A host path mounted into a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name. Mounts are merged by name.
    pub name: String,
    /// Path on the host.
    #[serde(default)]
    pub host_path: String,
    /// Path inside the container.
    #[serde(default)]
    pub mount_path: String,
}

/// Container defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Image reference.
    #[serde(default, skip_serializing_if = "String::is_empty")]
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
    /// User id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Group id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl Template {
    /// Fills every unset field from `other`. Fields already set here win.
    pub fn merge_from(&mut self, other: &Self) {
        if self.image.is_empty() {
            self.image.clone_from(&other.image);
        }
        if self.command.is_empty() {
            self.command.clone_from(&other.command);
        }
        if self.args.is_empty() {
            self.args.clone_from(&other.args);
        }
        if self.working_dir.is_empty() {
            self.working_dir.clone_from(&other.working_dir);
        }
        if self.uid.is_none() {
            self.uid = other.uid;
        }
        if self.gid.is_none() {
            self.gid = other.gid;
        }

        for mount in &other.volume_mounts {
            if !self.volume_mounts.iter().any(|m| m.name == mount.name) {
                self.volume_mounts.push(mount.clone());
            }
        }
    }

    /// Returns whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Merges `from` into `into` following the "first non-empty wins" rule.
pub fn merge_template(into: &mut Option<Template>, from: Option<&Template>) {
    match (into.as_mut(), from) {
        (Some(target), Some(source)) => target.merge_from(source),
        (None, Some(source)) => *into = Some(source.clone()),
        (_, None) => {}
    }
}
