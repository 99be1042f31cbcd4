//! Interceptors used to observe or stand in for step bodies.

use crate::context::StepContext;
use crate::errors::StepError;
use crate::interceptors::{continuation, Interceptor, Next, StepOutput};
use crate::pipeline::Pipeline;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Appends `pre <label>` and `post <label>` lines around `next`.
#[derive(Debug)]
pub struct RecordingInterceptor {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
    priority: i32,
    short_circuit: Option<StepError>,
}

impl RecordingInterceptor {
    /// Creates a recorder writing into `log`.
    #[must_use]
    pub fn new(label: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label: label.into(),
            log,
            priority: 0,
            short_circuit: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns `err` after the pre line instead of calling `next`.
    #[must_use]
    pub fn short_circuit(mut self, err: StepError) -> Self {
        self.short_circuit = Some(err);
        self
    }
}

impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(continuation(move |ctx| {
            let this = Arc::clone(&self);
            let next = Arc::clone(&next);
            async move {
                this.log.lock().push(format!("pre {}", this.label));
                if let Some(err) = &this.short_circuit {
                    return (ctx, Err(err.clone()));
                }
                let (ctx, result) = next(ctx).await;
                this.log.lock().push(format!("post {}", this.label));
                (ctx, result)
            }
        }))
    }
}

type Body = Arc<dyn Fn(StepContext) -> BoxFuture<'static, StepOutput> + Send + Sync>;

/// Runs a closure as the innermost body of a step and counts calls.
///
/// The body replaces `next`; interceptors ordered after it never run.
pub struct FnInterceptor {
    body: Body,
    calls: AtomicUsize,
}

impl FnInterceptor {
    /// Creates a body from an async closure.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutput> + Send + 'static,
    {
        Self {
            body: Arc::new(move |ctx| body(ctx).boxed()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A body that always fails with `err`.
    #[must_use]
    pub fn failing(err: StepError) -> Self {
        Self::new(move |ctx| {
            let err = err.clone();
            async move { (ctx, Err(err)) }
        })
    }

    /// A body that sets an environment variable.
    #[must_use]
    pub fn set_env(key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        Self::new(move |mut ctx| {
            ctx.envs.insert(key.clone(), value.clone());
            async move { (ctx, Ok(())) }
        })
    }

    /// Number of times the body ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FnInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Interceptor for FnInterceptor {
    fn name(&self) -> &'static str {
        "fn"
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, _next: Next) -> Result<Next, StepError> {
        Ok(continuation(move |ctx| {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.body)(ctx)
        }))
    }
}
