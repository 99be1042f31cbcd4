//! Deferred teardown of resources created during a run.

use crate::errors::StepError;
use futures::future::{join_all, BoxFuture};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// A deferred cleanup. Receives the grace period it may use.
pub type TeardownFn = Box<dyn FnOnce(Duration) -> BoxFuture<'static, Result<(), StepError>> + Send>;

/// A named teardown closure.
pub struct Teardown {
    /// Name for logging, typically the pod being deleted.
    pub name: String,
    /// The cleanup to run.
    pub run: TeardownFn,
}

impl Teardown {
    /// Creates a named teardown.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(Duration) -> BoxFuture<'static, Result<(), StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown").field("name", &self.name).finish()
    }
}

/// Producer side of the teardown queue. Cheap to clone and safe to use from
/// any task.
#[derive(Debug, Clone)]
pub struct TeardownSender {
    sender: mpsc::UnboundedSender<Teardown>,
}

impl TeardownSender {
    /// Queues a teardown. Returns false if the registry is gone.
    pub fn schedule(&self, teardown: Teardown) -> bool {
        let name = teardown.name.clone();
        if self.sender.send(teardown).is_err() {
            warn!(teardown = %name, "teardown registry closed, dropping teardown");
            return false;
        }
        debug!(teardown = %name, "teardown scheduled");
        true
    }
}

/// Registry of teardowns drained once the pipeline body has returned.
///
/// Producers push over an unbounded channel; the registry is the single
/// consumer and runs every queued teardown concurrently within a grace period.
#[derive(Debug)]
pub struct TeardownRegistry {
    sender: mpsc::UnboundedSender<Teardown>,
    receiver: Mutex<mpsc::UnboundedReceiver<Teardown>>,
}

impl Default for TeardownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TeardownRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Returns a producer handle.
    #[must_use]
    pub fn sender(&self) -> TeardownSender {
        TeardownSender {
            sender: self.sender.clone(),
        }
    }

    /// Runs every queued teardown concurrently.
    ///
    /// Each teardown must finish before the grace period elapses. Failures are
    /// collected as `(name, message)` pairs and don't stop the others.
    pub async fn run_all(&self, grace: Duration) -> Vec<(String, String)> {
        let mut queued = Vec::new();
        {
            let mut receiver = self.receiver.lock().await;
            while let Ok(teardown) = receiver.try_recv() {
                queued.push(teardown);
            }
        }

        if queued.is_empty() {
            return Vec::new();
        }

        debug!(count = queued.len(), "running teardowns");
        let deadline = Instant::now() + grace;

        let results = join_all(queued.into_iter().map(|teardown| async move {
            let name = teardown.name;
            let outcome = tokio::time::timeout_at(deadline, (teardown.run)(grace)).await;
            (name, outcome)
        }))
        .await;

        let mut failures = Vec::new();
        for (name, outcome) in results {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(teardown = %name, error = %e, "failed to execute teardown");
                    failures.push((name, e.to_string()));
                }
                Err(_) => {
                    let msg = "teardown timed out".to_string();
                    warn!(teardown = %name, "{}", msg);
                    failures.push((name, msg));
                }
            }
        }

        failures
    }
}
