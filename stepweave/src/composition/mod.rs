//! Interceptors that run other steps.
//!
//! This module provides:
//! - [`And`] for sequential references
//! - [`Concurrent`], [`Matrix`] and [`Pipe`] for fan-out and fan-in
//! - [`Needs`] for run-once dependencies
//! - [`Inherit`] for nested pipelines
//!
//! Branch contexts are deep copies; they come back through
//! [`StepContext::merge`] in the single task collecting results, which always
//! drains every branch before returning.

mod and;
mod concurrent;
mod inherit;
mod matrix;
mod needs;
mod pipe;

pub use and::And;
pub use concurrent::Concurrent;
pub use inherit::Inherit;
pub use matrix::{combinations, Matrix};
pub use needs::Needs;
pub use pipe::Pipe;

use crate::cancellation::BranchGroup;
use crate::context::StepContext;
use crate::errors::StepError;
use crate::interceptors::{Next, StepOutput};
use crate::pipeline::Pipeline;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Builds the entrypoints of referenced steps, in order.
pub(crate) fn entrypoints(
    pipeline: &Arc<Pipeline>,
    refs: &[String],
) -> Result<Vec<(String, Next)>, StepError> {
    refs.iter()
        .map(|name| {
            let step = pipeline.step(name)?;
            Ok((name.clone(), step.entrypoint()?))
        })
        .collect()
}

/// Resolves the pipeline a composition step was built in.
///
/// Chains cache their continuations inside the pipeline, so they only hold
/// it weakly.
pub(crate) fn upgrade(pipeline: &Weak<Pipeline>) -> Result<Arc<Pipeline>, StepError> {
    pipeline
        .upgrade()
        .ok_or_else(|| StepError::Internal("pipeline dropped while running".into()))
}

/// Checks that every reference names a step of `pipeline`.
pub(crate) fn check_refs(pipeline: &Pipeline, refs: &[String]) -> Result<(), StepError> {
    for name in refs {
        if pipeline.chain(name).is_none() {
            return Err(StepError::StepNotFound(name.clone()));
        }
    }
    Ok(())
}

/// Collects every branch of `group`.
///
/// Each returned context is handed to `merge` as it arrives. Aborting errors
/// are collected; with `fail_fast` the first one cancels the remaining
/// branches, which are still drained.
pub(crate) async fn fan_in<F>(
    group: &mut BranchGroup<StepOutput>,
    fail_fast: bool,
    mut merge: F,
) -> Vec<StepError>
where
    F: FnMut(&str, StepContext),
{
    let mut errors = Vec::new();

    while let Some(branch) = group.next().await {
        let failure = match branch.result {
            Ok((ctx, result)) => {
                merge(&branch.name, ctx);
                result.err()
            }
            Err(err) => Some(err),
        };

        if let Some(err) = failure.filter(StepError::abort_on_error) {
            debug!(branch = %branch.name, error = %err, "branch failed");
            errors.push(err);
            if fail_fast && !group.is_cancelled() {
                group.cancel_all("fail fast");
            }
        }
    }

    errors
}
