//! An in-process driver whose containers are async closures.

use crate::driver::{ContainerSpec, ContainerStatus, Driver, Pod, PodAwait, PodStdio};
use crate::errors::DriverError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type Script = Arc<dyn Fn(PodRun) -> BoxFuture<'static, Result<(), DriverError>> + Send + Sync>;

/// What a script sees of the pod it runs in.
#[derive(Debug, Clone)]
pub struct PodRun {
    /// The pod as created.
    pub pod: Pod,
    /// Environment of the first container.
    pub env: HashMap<String, String>,
    /// Attached stdio.
    pub stdio: PodStdio,
}

impl PodRun {
    /// The first container of the pod.
    #[must_use]
    pub fn container(&self) -> Option<&ContainerSpec> {
        self.pod.spec.containers.first()
    }

    /// Arguments of the first container.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        self.container().map(|c| c.args.clone()).unwrap_or_default()
    }

    /// Writes to stdout.
    ///
    /// # Errors
    ///
    /// Returns a backend error if a stream rejects the write.
    pub async fn print(&self, text: &str) -> Result<(), DriverError> {
        self.stdio
            .stdout
            .write_all(text.as_bytes())
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))
    }

    /// Writes to stderr.
    ///
    /// # Errors
    ///
    /// Returns a backend error if a stream rejects the write.
    pub async fn eprint(&self, text: &str) -> Result<(), DriverError> {
        self.stdio
            .stderr
            .write_all(text.as_bytes())
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))
    }

    /// Reads stdin to the end.
    ///
    /// # Errors
    ///
    /// Returns a backend error if reading fails.
    pub async fn read_stdin(&self) -> Result<String, DriverError> {
        match &self.stdio.stdin {
            Some(stdin) => stdin
                .read_to_end()
                .await
                .map(|buf| String::from_utf8_lossy(&buf).into_owned())
                .map_err(|e| DriverError::Backend(e.to_string())),
            None => Ok(String::new()),
        }
    }

    /// Appends a line to the variables file named by the environment
    /// variable `var`, e.g. `STEPWEAVE_OUTPUT`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the variable is unset or the write fails.
    pub async fn write_var(&self, var: &str, line: &str) -> Result<(), DriverError> {
        use tokio::io::AsyncWriteExt;

        let path = self
            .env
            .get(var)
            .map(PathBuf::from)
            .ok_or_else(|| DriverError::Backend(format!("{var} is not set")))?;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))
    }
}

/// A [`Driver`] that runs registered closures instead of containers.
///
/// Scripts are registered per image. Each created pod starts its script on
/// a tokio task, and records the pod; deleted pods are recorded too.
#[derive(Default)]
pub struct ScriptedDriver {
    scripts: Mutex<HashMap<String, Script>>,
    created: Mutex<Vec<Pod>>,
    deleted: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    /// Creates a driver without scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the script run for `image`.
    #[must_use]
    pub fn script<F, Fut>(self, image: impl Into<String>, script: F) -> Self
    where
        F: Fn(PodRun) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        self.scripts
            .lock()
            .insert(image.into(), Arc::new(move |run| script(run).boxed()));
        self
    }

    /// Pods created so far.
    #[must_use]
    pub fn created(&self) -> Vec<Pod> {
        self.created.lock().clone()
    }

    /// Names of pods deleted so far.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

impl std::fmt::Debug for ScriptedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedDriver")
            .field("images", &self.scripts.lock().keys().cloned().collect::<Vec<_>>())
            .field("created", &self.created.lock().len())
            .finish()
    }
}

struct ScriptedAwait(JoinHandle<Result<(), DriverError>>);

#[async_trait]
impl PodAwait for ScriptedAwait {
    async fn wait(self: Box<Self>) -> Result<(), DriverError> {
        match self.0.await {
            Ok(result) => result,
            Err(err) => Err(DriverError::Backend(err.to_string())),
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn create_pod(
        &self,
        pod: &mut Pod,
        stdio: PodStdio,
    ) -> Result<Box<dyn PodAwait>, DriverError> {
        let container = pod
            .spec
            .containers
            .first()
            .cloned()
            .ok_or_else(|| DriverError::Backend("pod has no containers".into()))?;

        let script = self
            .scripts
            .lock()
            .get(&container.image)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(pod.name.clone()))?;

        pod.status.pod_ip = "127.0.0.1".into();
        pod.status.containers = pod
            .spec
            .containers
            .iter()
            .map(|c| ContainerStatus {
                container_id: format!("{}-{}", pod.name, c.name),
                container_ip: "127.0.0.1".into(),
                name: c.name.clone(),
                ready: true,
                started: true,
                exit_code: 0,
            })
            .collect();
        self.created.lock().push(pod.clone());

        let env = container
            .env
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let run = PodRun {
            pod: pod.clone(),
            env,
            stdio,
        };
        Ok(Box::new(ScriptedAwait(tokio::spawn(script(run)))))
    }

    async fn delete_pod(&self, pod: &Pod, _timeout: Duration) -> Result<(), DriverError> {
        self.deleted.lock().push(pod.name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CaptureBuffer, Tee};
    use crate::driver::PodSpec;

    #[tokio::test]
    async fn test_runs_registered_script() {
        let driver = ScriptedDriver::new().script("alpine", |run| async move {
            run.print(&run.args().join(" ")).await
        });

        let out = CaptureBuffer::new();
        let mut pod = Pod {
            name: "build-abc".into(),
            spec: PodSpec {
                containers: vec![ContainerSpec {
                    name: "build".into(),
                    image: "alpine".into(),
                    args: vec!["echo".into(), "hi".into()],
                    ..ContainerSpec::default()
                }],
            },
            ..Pod::default()
        };
        let stdio = PodStdio {
            stdout: Tee::new(vec![out.stream()]),
            ..PodStdio::default()
        };

        let handle = driver.create_pod(&mut pod, stdio).await.unwrap();
        handle.wait().await.unwrap();

        assert_eq!(out.text(), "echo hi");
        assert_eq!(pod.status.containers[0].container_id, "build-abc-build");
        assert_eq!(driver.created().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_image() {
        let driver = ScriptedDriver::new();
        let mut pod = Pod {
            name: "x".into(),
            spec: PodSpec {
                containers: vec![ContainerSpec {
                    image: "missing".into(),
                    ..ContainerSpec::default()
                }],
            },
            ..Pod::default()
        };
        let err = driver
            .create_pod(&mut pod, PodStdio::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::NotFound(_)));
    }
}
