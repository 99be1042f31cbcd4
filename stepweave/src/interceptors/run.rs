//! Running a step's container through the driver.

use super::{continuation, Interceptor, LateBinding, Next, StepOutput};
use crate::cancellation::{Teardown, TeardownSender};
use crate::context::{prefix_name, OutputStream, StepContext, Tee, Template};
use crate::driver::{
    ContainerSpec, Driver, Pod, PodAwait, PodSpec, PodStdio, PullImagePolicy, Volume,
};
use crate::errors::{DriverError, StepError};
use crate::mask::SecretStore;
use crate::pipeline::{random_suffix, AwaitStatus, Pipeline, RunSpec};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Environment variable holding the path of the env variables file.
pub const ENV_VAR_FILE: &str = "STEPWEAVE_ENV";
/// Environment variable holding the path of the secret variables file.
pub const SECRET_VAR_FILE: &str = "STEPWEAVE_SECRET";
/// Environment variable holding the path of the output variables file.
pub const OUTPUT_VAR_FILE: &str = "STEPWEAVE_OUTPUT";

/// Runs the step's container, then calls the continuation.
///
/// The pod is named `<prefixed step>-<pipeline id>-<random>`. Unset fields of
/// the run spec fall back to the context template. Every writer handed to
/// the driver masks registered secrets. With `await: ready` the container
/// keeps running after the step; its exit is collected at teardown.
pub struct Run {
    step: String,
    spec: RunSpec,
    driver: Arc<dyn Driver>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    tee: bool,
    pull_policy: PullImagePolicy,
    secrets: Arc<SecretStore>,
    teardown: Option<TeardownSender>,
}

impl Run {
    /// Creates the runner.
    #[must_use]
    pub fn new(step: impl Into<String>, spec: RunSpec, driver: Arc<dyn Driver>) -> Self {
        Self {
            step: step.into(),
            spec,
            driver,
            stdout: None,
            stderr: None,
            tee: false,
            pull_policy: PullImagePolicy::default(),
            secrets: Arc::new(SecretStore::new()),
            teardown: None,
        }
    }

    /// Sets the writers used when the context carries none, or in addition
    /// to the context's writers with `tee`.
    #[must_use]
    pub fn with_stdio(mut self, stdout: OutputStream, stderr: OutputStream) -> Self {
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self
    }

    /// Sets whether the default writers also receive redirected output.
    #[must_use]
    pub const fn with_tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }

    /// Sets the image pull policy.
    #[must_use]
    pub const fn with_pull_policy(mut self, policy: PullImagePolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Sets the store used to mask secrets in output.
    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Sets the queue collecting background containers started with
    /// `await: ready`.
    #[must_use]
    pub fn with_teardown(mut self, teardown: TeardownSender) -> Self {
        self.teardown = Some(teardown);
        self
    }

    fn binding_key(&self) -> String {
        format!("{}/run", self.step)
    }

    fn writers(&self, inherited: &[OutputStream], default: Option<&OutputStream>) -> Tee {
        let mut streams = inherited.to_vec();
        if let Some(default) = default {
            if streams.is_empty() || self.tee {
                streams.push(default.clone());
            }
        }

        Tee::new(
            streams
                .into_iter()
                .map(|s| s.with_mask(Arc::clone(&self.secrets)))
                .collect(),
        )
    }

    fn container(&self, ctx: &StepContext, spec: RunSpec) -> ContainerSpec {
        let template = ctx.template.clone().unwrap_or_default();
        let pick = |own: Vec<String>, fallback: &Vec<String>| {
            if own.is_empty() {
                fallback.clone()
            } else {
                own
            }
        };

        ContainerSpec {
            name: self.step.clone(),
            image: if spec.image.is_empty() {
                template.image.clone()
            } else {
                spec.image
            },
            command: pick(spec.command, &template.command),
            args: pick(spec.args, &template.args),
            env: container_env(ctx),
            pwd: if spec.working_dir.is_empty() {
                template.working_dir.clone()
            } else {
                spec.working_dir
            },
            stdin: spec.stdin || ctx.stdio.stdin.is_some(),
            tty: spec.tty,
            uid: template.uid,
            gid: template.gid,
            image_pull_policy: self.pull_policy,
            volumes: volumes(&template),
            ..ContainerSpec::default()
        }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next, pipeline_id: Arc<str>) -> StepOutput {
        let spec: RunSpec = match ctx.binding(&self.binding_key(), &self.spec) {
            Ok(spec) => spec,
            Err(err) => return (ctx, Err(err)),
        };

        let await_status = spec.await_status;
        let mut pod = Pod {
            name: format!(
                "{}-{}-{}",
                prefix_name(&self.step, &ctx.name_prefix),
                pipeline_id,
                random_suffix(5)
            ),
            spec: PodSpec {
                containers: vec![self.container(&ctx, spec)],
            },
            ..Pod::default()
        };

        let stdio = PodStdio {
            stdin: ctx.stdio.stdin.clone(),
            stdout: self.writers(&ctx.stdio.stdout, self.stdout.as_ref()),
            stderr: self.writers(&ctx.stdio.stderr, self.stderr.as_ref()),
        };
        let writers = (stdio.stdout.clone(), stdio.stderr.clone());

        debug!(step = %self.step, pod = %pod.name, "creating pod");
        let handle = match self.driver.create_pod(&mut pod, stdio).await {
            Ok(handle) => handle,
            Err(source) => {
                return (
                    ctx,
                    Err(StepError::Container {
                        pod: pod.name,
                        source,
                    }),
                )
            }
        };

        for status in &pod.status.containers {
            ctx.containers.insert(status.name.clone(), status.clone());
        }

        let waited = match await_status {
            AwaitStatus::Ready => {
                self.spawn_waiter(pod.name.clone(), handle, writers);
                Ok(())
            }
            AwaitStatus::Exit => {
                let cancel = Arc::clone(&ctx.cancel);
                let waited = tokio::select! {
                    result = handle.wait() => result.map_err(Some),
                    () = cancel.cancelled() => Err(None),
                };
                flush(&pod.name, &writers).await;
                waited
            }
        };

        match waited {
            Ok(()) => {
                info!(step = %self.step, pod = %pod.name, "container finished");
                next(ctx).await
            }
            Err(Some(source)) => {
                if let (DriverError::Exit { code }, Some(status)) =
                    (&source, ctx.containers.get_mut(&self.step))
                {
                    status.exit_code = *code;
                }
                (
                    ctx,
                    Err(StepError::Container {
                        pod: pod.name,
                        source,
                    }),
                )
            }
            Err(None) => {
                let reason = ctx.cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                (ctx, Err(StepError::Cancelled(reason)))
            }
        }
    }

    /// Waits for a ready container in the background and queues the wait's
    /// result as a teardown.
    fn spawn_waiter(&self, pod: String, handle: Box<dyn PodAwait>, writers: (Tee, Tee)) {
        let waiter = tokio::spawn({
            let pod = pod.clone();
            async move {
                let result = handle.wait().await;
                flush(&pod, &writers).await;
                if let Err(err) = &result {
                    error!(%pod, error = %err, "background container failed");
                }
                result
            }
        });

        let Some(teardown) = &self.teardown else {
            return;
        };
        teardown.schedule(Teardown::new(format!("{pod}/wait"), move |_| {
            async move {
                match waiter.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(source)) => Err(StepError::Container { pod, source }),
                    Err(err) => Err(StepError::Internal(format!("waiting for {pod}: {err}"))),
                }
            }
            .boxed()
        }));
    }
}

/// Writes out output held back by secret masking.
async fn flush(pod: &str, (stdout, stderr): &(Tee, Tee)) {
    for tee in [stdout, stderr] {
        if let Err(err) = tee.flush().await {
            warn!(%pod, error = %err, "flushing container output failed");
        }
    }
}

fn container_env(ctx: &StepContext) -> Vec<String> {
    let mut env: BTreeMap<String, String> = ctx
        .envs
        .iter()
        .chain(ctx.secrets.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let files = [
        (ENV_VAR_FILE, &ctx.env_file),
        (SECRET_VAR_FILE, &ctx.secret_file),
        (OUTPUT_VAR_FILE, &ctx.output_file),
    ];
    for (var, path) in files {
        if let Some(path) = path {
            env.insert(var.to_string(), path.display().to_string());
        }
    }
    for output in &ctx.outputs {
        env.insert(
            format!("{OUTPUT_VAR_FILE}_{}", output.name.to_uppercase()),
            output.path.display().to_string(),
        );
    }

    env.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

fn volumes(template: &Template) -> Vec<Volume> {
    template
        .volume_mounts
        .iter()
        .map(|m| Volume {
            name: m.name.clone(),
            path: m.mount_path.clone(),
            host_path: m.host_path.clone(),
        })
        .collect()
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("step", &self.step)
            .field("spec", &self.spec)
            .field("tee", &self.tee)
            .finish_non_exhaustive()
    }
}

impl Interceptor for Run {
    fn name(&self) -> &'static str {
        "run"
    }

    fn priority(&self) -> i32 {
        super::priority::RUN
    }

    fn bootstrap(self: Arc<Self>, pipeline: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        let pipeline_id: Arc<str> = Arc::from(pipeline.id());
        Ok(continuation(move |ctx| {
            Arc::clone(&self).call(ctx, Arc::clone(&next), Arc::clone(&pipeline_id))
        }))
    }

    fn late_binding(&self) -> Option<LateBinding> {
        let document = serde_json::to_value(&self.spec).ok()?;
        Some(LateBinding::new(self.binding_key(), document))
    }
}
