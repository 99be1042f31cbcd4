//! Pipeline building and execution.
//!
//! This module provides:
//! - Pipeline specifications
//! - The step graph with lazily built entrypoints
//! - [`Engine`], assembling interceptor chains from specifications
//! - [`Executable`], running a built pipeline against a context directory

mod builder;
mod executable;
mod graph;
mod inputs;
mod spec;


pub use builder::Engine;
pub use executable::{Executable, RunOptions, RunOutcome};
pub use graph::{Pipeline, Step};
pub use inputs::{parse_inputs, parse_raw_inputs};
pub use spec::{
    AwaitStatus, ConcurrentSpec, EnvVar, InheritSpec, InputSpec, InputType, MatrixSpec,
    OutputSpec, PipeSpec, PipelineSpec, RefsSpec, RetrySpec, RunSpec, StepInput, StepSpec,
    StreamSpec, Streams, TagSpec,
};

pub(crate) use graph::random_suffix;
