//! Structured cancellation, branch fan-out and teardown.
//!
//! This module provides:
//! - CancellationToken for cooperative, tree-shaped cancellation
//! - BranchGroup for fanning work out to tasks and collecting it back
//! - TeardownRegistry for cleanup deferred until the run has finished

mod task_group;
mod teardown;
mod token;

pub use task_group::{panic_message, BranchGroup, BranchResult};
pub use teardown::{Teardown, TeardownFn, TeardownRegistry, TeardownSender};
pub use token::CancellationToken;
