//! State shared by every context of a single run.

use super::ContextDelta;
use crate::errors::StepError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

type Flight = Arc<OnceCell<(ContextDelta, Result<(), StepError>)>>;

/// Run-wide state. Shared, not copied, by [`StepContext::deep_copy`](super::StepContext::deep_copy).
#[derive(Debug)]
pub struct RunScope {
    run_id: Uuid,
    flights: DashMap<String, Flight>,
}

impl Default for RunScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RunScope {
    /// Creates a scope for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            flights: DashMap::new(),
        }
    }

    /// The run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Runs `f` at most once per key for the whole run.
    ///
    /// Concurrent callers with the same key wait for the first one and receive
    /// a copy of its outcome.
    pub async fn run_once<F, Fut>(&self, key: &str, f: F) -> (ContextDelta, Result<(), StepError>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (ContextDelta, Result<(), StepError>)>,
    {
        let flight = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        flight.get_or_init(f).await.clone()
    }

    /// Whether `key` already ran or is running.
    #[must_use]
    pub fn has_run(&self, key: &str) -> bool {
        self.flights.get(key).is_some_and(|f| f.initialized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_once_single_flight() {
        let scope = Arc::new(RunScope::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let scope = scope.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                scope
                    .run_once("build", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        (ContextDelta::default(), Ok(()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let (_, result) = handle.await.unwrap();
            assert!(result.is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scope.has_run("build"));
        assert!(!scope.has_run("test"));
    }
}
