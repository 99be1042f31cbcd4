//! The execution backend boundary.
//!
//! The engine never runs a process itself. A [`Driver`] turns a [`Pod`] into
//! running containers and reports back their status.

use crate::context::{InputStream, Tee};
use crate::errors::DriverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Image pull behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullImagePolicy {
    /// Always pull.
    Always,
    /// Never pull.
    Never,
    /// Pull if not present locally.
    #[default]
    Missing,
}

/// Container restart behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    Never,
    /// Restart on non-zero exit.
    OnFailure,
    /// Always restart.
    Always,
}

/// A volume mounted into a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Path inside the container.
    pub path: String,
    /// Path on the host.
    pub host_path: String,
}

/// Specification of a single container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Entrypoint.
    pub command: Vec<String>,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Working directory.
    pub pwd: String,
    /// Whether stdin is attached.
    pub stdin: bool,
    /// Whether a TTY is allocated.
    pub tty: bool,
    /// User id.
    pub uid: Option<u32>,
    /// Group id.
    pub gid: Option<u32>,
    /// Image pull behaviour.
    pub image_pull_policy: PullImagePolicy,
    /// Restart behaviour.
    pub restart_policy: RestartPolicy,
    /// Volumes.
    pub volumes: Vec<Volume>,
}

/// Runtime status of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    /// Backend container id.
    #[serde(default)]
    pub container_id: String,
    /// Container address.
    #[serde(default)]
    pub container_ip: String,
    /// Container name.
    #[serde(default)]
    pub name: String,
    /// Whether the container is ready.
    #[serde(default)]
    pub ready: bool,
    /// Whether the container started.
    #[serde(default)]
    pub started: bool,
    /// Exit code, once exited.
    #[serde(default)]
    pub exit_code: i32,
}

/// Desired containers of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSpec {
    /// Containers.
    pub containers: Vec<ContainerSpec>,
}

/// Observed state of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodStatus {
    /// Pod address.
    pub pod_ip: String,
    /// Container statuses.
    pub containers: Vec<ContainerStatus>,
}

/// A unit of execution handed to a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pod {
    /// Pod name.
    pub name: String,
    /// Desired state.
    pub spec: PodSpec,
    /// Observed state, filled in by the driver.
    pub status: PodStatus,
}

/// Stdio attached to a pod.
#[derive(Debug, Clone, Default)]
pub struct PodStdio {
    /// Standard input.
    pub stdin: Option<InputStream>,
    /// Standard output.
    pub stdout: Tee,
    /// Standard error.
    pub stderr: Tee,
}

/// Handle to wait for a created pod.
#[async_trait]
pub trait PodAwait: Send {
    /// Resolves when the pod exits.
    async fn wait(self: Box<Self>) -> Result<(), DriverError>;
}

/// An execution backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Creates and starts a pod. Container statuses are written into
    /// `pod.status` before returning.
    async fn create_pod(
        &self,
        pod: &mut Pod,
        stdio: PodStdio,
    ) -> Result<Box<dyn PodAwait>, DriverError>;

    /// Deletes a pod, allowing `timeout` for a graceful stop.
    async fn delete_pod(&self, pod: &Pod, timeout: Duration) -> Result<(), DriverError>;
}
