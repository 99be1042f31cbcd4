//! The decorator chain every step is compiled into.
//!
//! A step is an ordered list of [`Interceptor`]s. Building proceeds from the
//! innermost interceptor outwards: the terminal continuation returns the
//! context unchanged, and every interceptor wraps the continuation produced by
//! the ones after it. Interceptor *i* therefore runs its pre-logic before
//! delegating to *i+1* and its post-logic after that delegate returns.

use crate::context::StepContext;
use crate::errors::StepError;
use crate::pipeline::Pipeline;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// What every continuation returns: the context, always, and the result.
pub type StepOutput = (StepContext, Result<(), StepError>);

/// The boxed future of a continuation.
pub type StepFuture = BoxFuture<'static, StepOutput>;

/// A continuation: "the rest of the step's work".
pub type Next = Arc<dyn Fn(StepContext) -> StepFuture + Send + Sync>;

/// The identity continuation at the end of every chain.
#[must_use]
pub fn terminal() -> Next {
    Arc::new(|ctx| async move { (ctx, Ok(())) }.boxed())
}

/// Turns an async closure into a [`Next`].
pub fn continuation<F, Fut>(f: F) -> Next
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutput> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Wraps `next` with an async method of an interceptor.
///
/// ```rust,ignore
/// fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
///     Ok(wrap(self, next, Self::call))
/// }
/// ```
pub fn wrap<T, F, Fut>(this: Arc<T>, next: Next, f: F) -> Next
where
    T: Send + Sync + 'static + ?Sized,
    F: Fn(Arc<T>, StepContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutput> + Send + 'static,
{
    Arc::new(move |ctx| f(this.clone(), ctx, next.clone()).boxed())
}

/// A value an interceptor wants resolved by the substitution pass before it
/// runs.
#[derive(Debug, Clone, PartialEq)]
pub struct LateBinding {
    /// Key the resolved document is stored under in
    /// [`StepContext::bindings`].
    pub key: String,
    /// The raw document with `$(…)` tokens and `${{ … }}` expressions.
    pub document: serde_json::Value,
    /// Whether the binding may be resolved outside a matrix branch of a
    /// matrix step.
    pub outside_matrix: bool,
}

impl LateBinding {
    /// Creates a binding that is only resolved inside matrix branches of
    /// matrix steps.
    #[must_use]
    pub fn new(key: impl Into<String>, document: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            document,
            outside_matrix: false,
        }
    }
}

/// A single composable unit of step logic.
pub trait Interceptor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the interceptor's priority (lower = further out).
    fn priority(&self) -> i32 {
        0
    }

    /// Wraps `next`, returning the continuation the interceptor before this
    /// one will call. Errors abort building the whole step.
    fn bootstrap(self: Arc<Self>, pipeline: &Arc<Pipeline>, next: Next) -> Result<Next, StepError>;

    /// Values to resolve in the substitution pass.
    fn late_binding(&self) -> Option<LateBinding> {
        None
    }

    /// Names of the steps this interceptor runs.
    fn references(&self) -> &[String] {
        &[]
    }
}

/// The ordered interceptors of one step.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Creates a new empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Adds an interceptor. The chain stays sorted by priority; equal
    /// priorities keep insertion order.
    pub fn add(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
        self.interceptors.sort_by_key(|i| i.priority());
    }

    /// Adds an interceptor, builder style.
    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.add(interceptor);
        self
    }

    /// Builds the continuation, innermost interceptor first.
    pub fn build(&self, pipeline: &Arc<Pipeline>) -> Result<Next, StepError> {
        let mut next = terminal();
        for interceptor in self.interceptors.iter().rev() {
            next = Arc::clone(interceptor).bootstrap(pipeline, next)?;
        }
        Ok(next)
    }

    /// Collects the late bindings of every interceptor.
    #[must_use]
    pub fn late_bindings(&self) -> Vec<LateBinding> {
        self.interceptors
            .iter()
            .filter_map(|i| i.late_binding())
            .collect()
    }

    /// Steps referenced by any interceptor of the chain.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.interceptors
            .iter()
            .flat_map(|i| i.references())
            .map(String::as_str)
    }

    /// Names of the interceptors, outermost first.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Returns the number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_pipeline, RecordingInterceptor};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_terminal_is_identity() {
        let mut ctx = StepContext::new("/tmp");
        ctx.envs.insert("A".into(), "1".into());

        let (out, result) = terminal()(ctx).await;
        assert!(result.is_ok());
        assert_eq!(out.envs["A"], "1");
    }

    #[tokio::test]
    async fn test_decorator_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = InterceptorChain::new();
        for name in ["a", "b", "c", "d"] {
            chain.add(Arc::new(RecordingInterceptor::new(name, log.clone())));
        }

        let next = chain.build(&test_pipeline()).unwrap();
        let (_, result) = next(StepContext::new("/tmp")).await;
        assert!(result.is_ok());

        assert_eq!(
            *log.lock(),
            vec![
                "pre a", "pre b", "pre c", "pre d", "post d", "post c", "post b", "post a"
            ]
        );
    }

    #[tokio::test]
    async fn test_priority_orders_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with(Arc::new(
                RecordingInterceptor::new("inner", log.clone()).with_priority(20),
            ))
            .with(Arc::new(
                RecordingInterceptor::new("outer", log.clone()).with_priority(10),
            ));

        assert_eq!(chain.names(), vec!["recording", "recording"]);
        let next = chain.build(&test_pipeline()).unwrap();
        next(StepContext::new("/tmp")).await.1.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["pre outer", "pre inner", "post inner", "post outer"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with(Arc::new(RecordingInterceptor::new("a", log.clone())))
            .with(Arc::new(
                RecordingInterceptor::new("stop", log.clone()).short_circuit(StepError::SkipDone),
            ))
            .with(Arc::new(RecordingInterceptor::new("never", log.clone())));

        let next = chain.build(&test_pipeline()).unwrap();
        let (_, result) = next(StepContext::new("/tmp")).await;

        assert!(matches!(result, Err(StepError::SkipDone)));
        assert_eq!(*log.lock(), vec!["pre a", "pre stop", "post a"]);
    }
}
