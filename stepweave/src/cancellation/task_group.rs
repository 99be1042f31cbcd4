//! Structured fan-out of branch tasks.

use super::CancellationToken;
use crate::errors::StepError;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// A finished branch.
#[derive(Debug)]
pub struct BranchResult<T> {
    /// The name the branch was spawned with.
    pub name: String,
    /// The branch output, or the panic/abort that ended it.
    pub result: Result<T, StepError>,
}

/// A group of related branch tasks with structured cancellation.
///
/// Every branch runs under a child token of the parent, so cancelling the
/// parent or calling [`BranchGroup::cancel_all`] reaches all of them. Results
/// are collected by a single owner through [`BranchGroup::next`]; the group is
/// always drained, including after cancellation.
pub struct BranchGroup<T> {
    /// The cancellation token shared by all branches.
    cancel_token: Arc<CancellationToken>,
    /// Running branches.
    tasks: JoinSet<BranchResult<T>>,
    /// Optional concurrency bound.
    limit: Option<Arc<Semaphore>>,
}

impl<T: Send + 'static> BranchGroup<T> {
    /// Creates a group whose token is derived from `parent`.
    #[must_use]
    pub fn new(parent: &Arc<CancellationToken>, max_concurrent: Option<usize>) -> Self {
        Self {
            cancel_token: CancellationToken::child(parent),
            tasks: JoinSet::new(),
            limit: max_concurrent
                .filter(|n| *n > 0)
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a branch. Panics inside the branch are captured as
    /// [`StepError::Panic`].
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let token = self.cancel_token.clone();
        let limit = self.limit.clone();

        self.tasks.spawn(async move {
            let _permit = match limit {
                Some(limit) => match limit.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        return BranchResult {
                            name,
                            result: Err(StepError::Cancelled("branch limit closed".into())),
                        }
                    }
                },
                None => None,
            };

            debug!(branch = %name, "branch started");
            let result = AssertUnwindSafe(task(token))
                .catch_unwind()
                .await
                .map_err(|payload| StepError::Panic {
                    step: name.clone(),
                    payload: panic_message(payload.as_ref()),
                });

            BranchResult { name, result }
        });
    }

    /// Cancels all branches in the group.
    pub fn cancel_all(&self, reason: &str) {
        self.cancel_token.cancel(reason);
    }

    /// Waits for the next branch to finish. Returns `None` once every branch
    /// has been collected.
    pub async fn next(&mut self) -> Option<BranchResult<T>> {
        match self.tasks.join_next().await? {
            Ok(result) => Some(result),
            Err(join_error) => Some(BranchResult {
                name: String::new(),
                result: Err(StepError::Internal(format!("Task join error: {join_error}"))),
            }),
        }
    }

    /// Collects every remaining branch.
    pub async fn drain(&mut self) -> Vec<BranchResult<T>> {
        let mut rest = Vec::new();
        while let Some(result) = self.next().await {
            rest.push(result);
        }
        rest
    }

    /// Returns the number of branches not yet collected.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl<T> std::fmt::Debug for BranchGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchGroup")
            .field("task_count", &self.tasks.len())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

/// Renders a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
