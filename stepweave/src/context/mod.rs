//! The execution context and its parts.
//!
//! This module provides:
//! - The [`StepContext`] value threaded through every continuation
//! - Ledger entries, parameters, tags and container templates
//! - Stdio streams shared between steps
//! - Snapshot persistence and the expression view

#[cfg(test)]
mod context_tests;
mod execution;
mod params;
mod result;
mod scope;
mod snapshot;
mod stdio;
mod tags;
mod template;
mod view;

pub use execution::{prefix_name, suffix_name, ContextDelta, OutputParam, StepContext};
pub use params::ParamValue;
pub use result::StepResult;
pub use scope::RunScope;
pub use snapshot::{ContextSnapshot, SNAPSHOT_FILE};
pub use stdio::{pipe, CaptureBuffer, InputStream, OutputStream, StdioSet, Tee};
pub use tags::{tag_color, Tag};
pub use template::{merge_template, Template, VolumeMount};
pub use view::{expression_view, token_index};
