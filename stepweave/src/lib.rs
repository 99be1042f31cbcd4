//! # Stepweave
//!
//! A pipeline execution engine built on interceptor chains.
//!
//! A pipeline is a set of named steps. Every step is compiled into a chain of
//! interceptors, one per concern, that wrap each other around a terminal
//! continuation. A single mutable [`StepContext`](context::StepContext) flows
//! through the chain and comes back with the result, so every concern can
//! act before and after the rest of the step.
//!
//! Stepweave provides:
//!
//! - **Composition**: sequences, fan-out, matrix expansion, stdout→stdin
//!   pipes, run-once dependencies and nested pipelines
//! - **Resilience**: retries with backoff, timeouts, conditions, tolerated
//!   failures and resuming from a persisted ledger
//! - **Substitution**: `$(context.…)` tokens and `${{ … }}` expressions
//!   resolved against the context right before a step runs
//! - **Containers**: a [`Driver`](driver::Driver) abstraction with deferred
//!   teardown and secret masking on every output stream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepweave::prelude::*;
//!
//! let spec = PipelineSpec::new("ci")
//!     .with_entrypoint("all")
//!     .with_step(StepSpec::new("all").with_and(["lint", "test"]))
//!     .with_step(StepSpec::new("lint").with_run(RunSpec::new("rust", ["cargo", "clippy"])))
//!     .with_step(StepSpec::new("test").with_run(RunSpec::new("rust", ["cargo", "test"])));
//!
//! let config = EngineConfig::default().apply_env()?;
//! init_tracing(&config.log);
//!
//! let outcome = Engine::new(config, driver)
//!     .executable(spec)?
//!     .run(RunOptions::new())
//!     .await?;
//! outcome.result?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod composition;
pub mod config;
pub mod context;
pub mod driver;
pub mod errors;
pub mod events;
pub mod expressions;
pub mod interceptors;
pub mod lookup;
pub mod mask;
pub mod observability;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, TeardownRegistry};
    pub use crate::config::{EngineConfig, LogConfig, LogFormat};
    pub use crate::context::{
        CaptureBuffer, ContextSnapshot, ParamValue, StdioSet, StepContext, StepResult, Tag,
        Template,
    };
    pub use crate::driver::{Driver, Pod, PodAwait};
    pub use crate::errors::{
        DriverError, ExpressionError, LookupError, PipelineValidationError, StepError, StepOutcome,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, StepEvent};
    pub use crate::interceptors::{Interceptor, InterceptorChain, Next, StepOutput};
    pub use crate::lookup::{FileLookup, LookupChain, PipelineLookup, StaticLookup};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        ConcurrentSpec, Engine, Executable, InheritSpec, InputSpec, InputType, MatrixSpec,
        PipeSpec, Pipeline, PipelineSpec, RetrySpec, RunOptions, RunOutcome, RunSpec, StepSpec,
    };
}
