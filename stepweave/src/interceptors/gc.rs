use super::{wrap, Interceptor, Next, StepOutput};
use crate::cancellation::{Teardown, TeardownSender};
use crate::context::StepContext;
use crate::driver::{Driver, Pod, PodStatus};
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use futures::FutureExt;
use std::sync::Arc;

/// Queues deletion of the container a step created.
///
/// Deletion is deferred to the teardown phase of the run.
pub struct GarbageCollector {
    step: String,
    driver: Arc<dyn Driver>,
    teardown: TeardownSender,
}

impl GarbageCollector {
    /// Creates the collector.
    #[must_use]
    pub fn new(step: impl Into<String>, driver: Arc<dyn Driver>, teardown: TeardownSender) -> Self {
        Self {
            step: step.into(),
            driver,
            teardown,
        }
    }

    async fn call(self: Arc<Self>, ctx: StepContext, next: Next) -> StepOutput {
        let (ctx, result) = next(ctx).await;

        if let Some(status) = ctx.containers.get(&self.step) {
            let pod = Pod {
                name: status.container_id.clone(),
                status: PodStatus {
                    containers: vec![status.clone()],
                    ..PodStatus::default()
                },
                ..Pod::default()
            };
            let driver = Arc::clone(&self.driver);

            self.teardown
                .schedule(Teardown::new(pod.name.clone(), move |grace| {
                    async move {
                        driver
                            .delete_pod(&pod, grace)
                            .await
                            .map_err(|source| StepError::Container {
                                pod: pod.name.clone(),
                                source,
                            })
                    }
                    .boxed()
                }));
        }

        (ctx, result)
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl Interceptor for GarbageCollector {
    fn name(&self) -> &'static str {
        "garbage-collector"
    }

    fn priority(&self) -> i32 {
        super::priority::GARBAGE_COLLECTOR
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
