//! Engine configuration.

use crate::context::{Tag, Template};
use crate::errors::StepError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables read by [`EngineConfig::apply_env`].
pub const ENV_PREFIX: &str = "STEPWEAVE_";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,stepweave=debug`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Include the span list in every line.
    pub with_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            with_spans: false,
        }
    }
}

/// Settings shared by every pipeline built by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Directory under which each pipeline gets its context directory.
    pub context_dir: PathBuf,
    /// Bound on concurrent branches; unbounded when absent.
    pub max_concurrent: Option<usize>,
    /// Skip steps the recovered ledger marks as done.
    pub skip_done: bool,
    /// Steps that are never run.
    pub skip_steps: Vec<String>,
    /// Keep containers instead of deleting them after the run.
    pub no_gc: bool,
    /// Copy redirected and piped output to the inherited streams as well.
    pub tee: bool,
    /// Grace period given to teardowns, in milliseconds.
    pub graceful_termination_ms: u64,
    /// Tags attached to every step.
    pub tags: Vec<Tag>,
    /// Default environment of every step.
    pub envs: HashMap<String, String>,
    /// Container defaults of every step.
    pub template: Template,
    /// Tracing settings.
    pub log: LogConfig,
    /// Expose the host environment to variables declared without value.
    pub pass_host_env: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from(".stepweave"),
            max_concurrent: None,
            skip_done: false,
            skip_steps: Vec::new(),
            no_gc: false,
            tee: false,
            graceful_termination_ms: 30_000,
            tags: Vec::new(),
            envs: HashMap::new(),
            template: Template::default(),
            log: LogConfig::default(),
            pass_host_env: true,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StepError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies `STEPWEAVE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, StepError> {
        self.apply_vars(std::env::vars())
    }

    /// Applies `STEPWEAVE_*` overrides from `vars`.
    ///
    /// Recognized: `CONTEXT_DIR`, `MAX_CONCURRENT`, `SKIP_DONE`,
    /// `SKIP_STEPS` (comma separated), `NO_GC`, `TEE`,
    /// `GRACEFUL_TERMINATION_MS`, `LOG` and `LOG_FORMAT`.
    pub fn apply_vars<I>(mut self, vars: I) -> Result<Self, StepError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "CONTEXT_DIR" => self.context_dir = PathBuf::from(value),
                "MAX_CONCURRENT" => {
                    let max: usize = parse_var(&key, &value)?;
                    self.max_concurrent = (max > 0).then_some(max);
                }
                "SKIP_DONE" => self.skip_done = parse_bool(&key, &value)?,
                "SKIP_STEPS" => {
                    self.skip_steps = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect();
                }
                "NO_GC" => self.no_gc = parse_bool(&key, &value)?,
                "TEE" => self.tee = parse_bool(&key, &value)?,
                "GRACEFUL_TERMINATION_MS" => {
                    self.graceful_termination_ms = parse_var(&key, &value)?;
                }
                "LOG" => self.log.filter = value,
                "LOG_FORMAT" => {
                    self.log.format = match value.to_ascii_lowercase().as_str() {
                        "json" => LogFormat::Json,
                        "pretty" | "text" => LogFormat::Pretty,
                        _ => return Err(invalid(&key, &value)),
                    };
                }
                _ => {}
            }
        }
        Ok(self)
    }

    /// The grace period given to teardowns.
    #[must_use]
    pub const fn graceful_termination(&self) -> Duration {
        Duration::from_millis(self.graceful_termination_ms)
    }

    /// Sets the context directory root.
    #[must_use]
    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = dir.into();
        self
    }

    /// Bounds concurrent branches.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// Enables skipping steps already done.
    #[must_use]
    pub const fn with_skip_done(mut self, skip_done: bool) -> Self {
        self.skip_done = skip_done;
        self
    }

    /// Sets the deny-list.
    #[must_use]
    pub fn with_skip_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Disables container deletion.
    #[must_use]
    pub const fn with_no_gc(mut self, no_gc: bool) -> Self {
        self.no_gc = no_gc;
        self
    }

    /// Enables tee on redirected and piped output.
    #[must_use]
    pub const fn with_tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }

    /// Sets the teardown grace period.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_graceful_termination(mut self, grace: Duration) -> Self {
        self.graceful_termination_ms = grace.as_millis() as u64;
        self
    }

    /// Adds a global tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Adds a default environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(name.into(), value.into());
        self
    }

    /// Sets the global template.
    #[must_use]
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    /// Sets the tracing settings.
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Controls whether the host environment is visible to steps.
    #[must_use]
    pub const fn with_pass_host_env(mut self, pass: bool) -> Self {
        self.pass_host_env = pass;
        self
    }
}

fn invalid(key: &str, value: &str) -> StepError {
    StepError::Internal(format!("invalid value for {key}: {value:?}"))
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StepError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, StepError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
