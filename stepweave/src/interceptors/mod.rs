//! Interceptors (middleware) wrapped around every step.
//!
//! Each interceptor implements one concern. The builder assembles the
//! interceptors a step needs and [`InterceptorChain`] nests them in the fixed
//! order given by [`priority`].

mod chain;
mod conditional;
mod gc;
mod inputs;
mod ledger;
mod logger;
mod output;
mod recover;
mod retry;
mod run;
mod skip;
mod stdio;
mod substitute;
mod tags;
mod template;
mod timeout;
mod tmpdir;
mod vars;

pub use chain::{
    continuation, terminal, wrap, Interceptor, InterceptorChain, LateBinding, Next, StepFuture,
    StepOutput,
};
pub use conditional::If;
pub use gc::GarbageCollector;
pub use inputs::InputVars;
pub use ledger::Ledger;
pub use logger::{Logger, Report};
pub use output::OutputVars;
pub use recover::Recover;
pub use retry::{BackoffStrategy, Retry};
pub use run::{Run, ENV_VAR_FILE, OUTPUT_VAR_FILE, SECRET_VAR_FILE};
pub use skip::{AllowFailure, SkipBlacklist, SkipDone};
pub use stdio::StdioRedirect;
pub use substitute::Substitute;
pub use tags::Tags;
pub use template::ApplyTemplate;
pub use timeout::Timeout;
pub use tmpdir::TmpDir;
pub use vars::{EnvVars, SecretVars};

pub(crate) use vars::{create_var_file, keep_step_error, parse_var_file};

/// Nesting order of the built-in interceptors; lower runs further out.
pub mod priority {
    /// Panic boundary.
    pub const RECOVER: i32 = 100;
    /// Tracing span and lifecycle lines.
    pub const LOGGER: i32 = 200;
    /// Lifecycle events.
    pub const REPORT: i32 = 300;
    /// Skip steps already done.
    pub const SKIP_DONE: i32 = 400;
    /// Retry with backoff.
    pub const RETRY: i32 = 500;
    /// Ledger entry of the step.
    pub const LEDGER: i32 = 600;
    /// Step tags.
    pub const TAGS: i32 = 700;
    /// Step inputs.
    pub const INPUT_VARS: i32 = 800;
    /// Environment variables.
    pub const ENV_VARS: i32 = 900;
    /// Secret variables.
    pub const SECRET_VARS: i32 = 1000;
    /// Declared outputs.
    pub const OUTPUT_VARS: i32 = 1100;
    /// Matrix expansion.
    pub const MATRIX: i32 = 1200;
    /// Late binding resolution.
    pub const SUBSTITUTE: i32 = 1300;
    /// Deny-list.
    pub const SKIP_BLACKLIST: i32 = 1400;
    /// Container teardown.
    pub const GARBAGE_COLLECTOR: i32 = 1500;
    /// Tolerated failures.
    pub const ALLOW_FAILURE: i32 = 1600;
    /// Deadline.
    pub const TIMEOUT: i32 = 1700;
    /// Conditions.
    pub const IF: i32 = 1800;
    /// Container defaults.
    pub const TEMPLATE: i32 = 1900;
    /// Dependencies.
    pub const NEEDS: i32 = 2000;
    /// Scratch directory.
    pub const TMP_DIR: i32 = 2100;
    /// Stdio redirection.
    pub const STDIO_REDIRECT: i32 = 2200;
    /// Container run.
    pub const RUN: i32 = 2300;
    /// Pipeline inheritance.
    pub const INHERIT: i32 = 2400;
    /// Sequential references.
    pub const AND: i32 = 2500;
    /// Concurrent references.
    pub const CONCURRENT: i32 = 2600;
    /// Piped references.
    pub const PIPE: i32 = 2700;
}
