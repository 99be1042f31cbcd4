//! Testing utilities for stepweave pipelines.
//!
//! This module provides:
//! - A scripted in-process driver
//! - Interceptors that record or replace step bodies
//! - Context and pipeline fixtures

mod driver;
mod fixtures;
mod interceptors;

pub use driver::{PodRun, ScriptedDriver};
pub use fixtures::{pipeline_of, test_pipeline, TestContext};
pub use interceptors::{FnInterceptor, RecordingInterceptor};
