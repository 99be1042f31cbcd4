//! Environment and secret materialization through variables files.

use super::{wrap, Interceptor, Next, StepOutput};
use crate::context::StepContext;
use crate::errors::StepError;
use crate::expressions::{ExpressionEngine, Substitutor};
use crate::mask::SecretStore;
use crate::pipeline::{EnvVar, Pipeline};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::warn;

/// Creates an empty variables file in `dir`, removed when dropped.
pub(crate) fn create_var_file(dir: &Path, prefix: &str) -> Result<NamedTempFile, StepError> {
    std::fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?)
}

/// Parses a variables file of `KEY=VALUE` lines with shell-style quoting.
pub(crate) fn parse_var_file(path: &Path) -> Result<HashMap<String, String>, StepError> {
    let variables_error = |message: String| StepError::Variables {
        path: path.display().to_string(),
        message,
    };

    let iter = dotenvy::from_path_iter(path).map_err(|e| variables_error(e.to_string()))?;
    iter.map(|item| item.map_err(|e| variables_error(e.to_string())))
        .collect()
}

/// Records a failure to read back a variables file. A step that already
/// failed keeps its own error and the read failure is only logged.
pub(crate) fn keep_step_error(result: &mut Result<(), StepError>, err: StepError) {
    if result.is_ok() {
        *result = Err(err);
    } else {
        warn!(error = %err, "ignoring variables file of failed step");
    }
}

/// Resolves declared variables: values are substituted against the context,
/// variables without value come from `host`, `defaults` fill the rest.
fn resolve_vars(
    engine: &ExpressionEngine,
    ctx: &StepContext,
    vars: &[EnvVar],
    defaults: &HashMap<String, String>,
    host: &HashMap<String, String>,
) -> Result<HashMap<String, String>, StepError> {
    let substitutor = Substitutor::new(engine, ctx);
    let mut resolved = defaults.clone();
    for var in vars {
        match &var.value {
            Some(value) => {
                resolved.insert(var.name.clone(), substitutor.resolve_string(value)?);
            }
            None => {
                if let Some(value) = host.get(&var.name) {
                    resolved.insert(var.name.clone(), value.clone());
                }
            }
        }
    }
    Ok(resolved)
}

/// Exports environment variables to the step and reads back the ones it
/// writes to its env file.
pub struct EnvVars {
    vars: Vec<EnvVar>,
    defaults: HashMap<String, String>,
    host: HashMap<String, String>,
    engine: Arc<ExpressionEngine>,
}

impl EnvVars {
    /// Creates the interceptor.
    #[must_use]
    pub fn new(
        vars: Vec<EnvVar>,
        defaults: HashMap<String, String>,
        host: HashMap<String, String>,
        engine: Arc<ExpressionEngine>,
    ) -> Self {
        Self {
            vars,
            defaults,
            host,
            engine,
        }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let resolved = match resolve_vars(&self.engine, &ctx, &self.vars, &self.defaults, &self.host)
        {
            Ok(resolved) => resolved,
            Err(err) => return (ctx, Err(err)),
        };
        ctx.envs.extend(resolved);

        let file = match create_var_file(ctx.tmp_dir(), "env") {
            Ok(file) => file,
            Err(err) => return (ctx, Err(err)),
        };
        let previous = ctx.env_file.replace(file.path().to_path_buf());

        let (mut ctx, mut result) = next(ctx).await;
        ctx.env_file = previous;

        match parse_var_file(file.path()) {
            Ok(discovered) => ctx.envs.extend(discovered),
            Err(err) => keep_step_error(&mut result, err),
        }
        (ctx, result)
    }
}

impl std::fmt::Debug for EnvVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvVars").field("vars", &self.vars).finish_non_exhaustive()
    }
}

impl Interceptor for EnvVars {
    fn name(&self) -> &'static str {
        "env-vars"
    }

    fn priority(&self) -> i32 {
        super::priority::ENV_VARS
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

/// Exports secrets to the step, reads back the ones it writes to its secret
/// file and registers every value with the masking store.
pub struct SecretVars {
    vars: Vec<EnvVar>,
    host: HashMap<String, String>,
    engine: Arc<ExpressionEngine>,
    store: Arc<SecretStore>,
}

impl SecretVars {
    /// Creates the interceptor.
    #[must_use]
    pub fn new(
        vars: Vec<EnvVar>,
        host: HashMap<String, String>,
        engine: Arc<ExpressionEngine>,
        store: Arc<SecretStore>,
    ) -> Self {
        Self {
            vars,
            host,
            engine,
            store,
        }
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        let resolved =
            match resolve_vars(&self.engine, &ctx, &self.vars, &HashMap::new(), &self.host) {
                Ok(resolved) => resolved,
                Err(err) => return (ctx, Err(err)),
            };
        self.store.extend(resolved.values());
        self.store.extend(ctx.secrets.values());
        ctx.secrets.extend(resolved);

        let file = match create_var_file(ctx.tmp_dir(), "secret") {
            Ok(file) => file,
            Err(err) => return (ctx, Err(err)),
        };
        let previous: Option<PathBuf> = ctx.secret_file.replace(file.path().to_path_buf());

        let (mut ctx, mut result) = next(ctx).await;
        ctx.secret_file = previous;

        match parse_var_file(file.path()) {
            Ok(discovered) => {
                self.store.extend(discovered.values());
                ctx.secrets.extend(discovered);
            }
            Err(err) => keep_step_error(&mut result, err),
        }
        (ctx, result)
    }
}

impl std::fmt::Debug for SecretVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.vars.iter().map(|v| v.name.as_str()).collect();
        f.debug_struct("SecretVars").field("names", &names).finish_non_exhaustive()
    }
}

impl Interceptor for SecretVars {
    fn name(&self) -> &'static str {
        "secret-vars"
    }

    fn priority(&self) -> i32 {
        super::priority::SECRET_VARS
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptors::InterceptorChain;
    use crate::testing::{test_pipeline, FnInterceptor};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_var_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vars");
        std::fs::write(&path, "A=1\nB=\"two words\"\n# comment\nC='x=y'\n").unwrap();

        let vars = parse_var_file(&path).unwrap();
        assert_eq!(vars["A"], "1");
        assert_eq!(vars["B"], "two words");
        assert_eq!(vars["C"], "x=y");
        assert!(!vars.contains_key("# comment"));
    }

    #[test]
    fn test_parse_var_file_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vars");
        std::fs::write(&path, "NOT VALID LINE\n").unwrap();
        assert!(matches!(
            parse_var_file(&path),
            Err(StepError::Variables { .. })
        ));
    }

    #[tokio::test]
    async fn test_env_vars_round_trip() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(ExpressionEngine::new());
        let host = HashMap::from([("HOME".to_string(), "/home/me".to_string())]);
        let defaults = HashMap::from([("CI".to_string(), "true".to_string())]);

        let body = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            let path = ctx.env_file.clone().unwrap();
            std::fs::write(&path, "DISCOVERED=yes\n").unwrap();
            (ctx, Ok(()))
        }));
        let next = InterceptorChain::new()
            .with(Arc::new(EnvVars::new(
                vec![
                    EnvVar::new("GREETING", "hello $(context.inputs.name)"),
                    EnvVar::host("HOME"),
                    EnvVar::host("UNSET"),
                ],
                defaults,
                host,
                engine,
            )))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let mut ctx = StepContext::new(dir.path());
        ctx.inputs.insert("name".into(), "world".into());
        let (ctx, result) = next(ctx).await;
        result.unwrap();

        assert_eq!(ctx.envs["GREETING"], "hello world");
        assert_eq!(ctx.envs["HOME"], "/home/me");
        assert_eq!(ctx.envs["CI"], "true");
        assert_eq!(ctx.envs["DISCOVERED"], "yes");
        assert!(!ctx.envs.contains_key("UNSET"));
        assert!(ctx.env_file.is_none());
    }

    #[tokio::test]
    async fn test_secret_vars_register_mask() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SecretStore::new());

        let body = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            let path = ctx.secret_file.clone().unwrap();
            std::fs::write(&path, "TOKEN=s3cr3t\n").unwrap();
            (ctx, Ok(()))
        }));
        let next = InterceptorChain::new()
            .with(Arc::new(SecretVars::new(
                vec![EnvVar::new("PASSWORD", "hunter2")],
                HashMap::new(),
                Arc::new(ExpressionEngine::new()),
                store.clone(),
            )))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let mut ctx = StepContext::new(dir.path());
        ctx.secrets.insert("EXISTING".into(), "old".into());
        let (ctx, result) = next(ctx).await;
        result.unwrap();

        assert_eq!(ctx.secrets["PASSWORD"], "hunter2");
        assert_eq!(ctx.secrets["TOKEN"], "s3cr3t");
        assert_eq!(ctx.secrets["EXISTING"], "old");
        assert_eq!(
            store.mask(b"hunter2 s3cr3t").as_ref(),
            b"*** ***".as_slice()
        );
    }

    #[tokio::test]
    async fn test_step_error_survives_malformed_file() {
        let dir = TempDir::new().unwrap();
        let body = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            std::fs::write(ctx.env_file.clone().unwrap(), "NOT VALID LINE\n").unwrap();
            std::fs::write(ctx.secret_file.clone().unwrap(), "ALSO BROKEN\n").unwrap();
            (ctx, Err(StepError::Timeout))
        }));
        let next = InterceptorChain::new()
            .with(Arc::new(EnvVars::new(
                Vec::new(),
                HashMap::new(),
                HashMap::new(),
                Arc::new(ExpressionEngine::new()),
            )))
            .with(Arc::new(SecretVars::new(
                Vec::new(),
                HashMap::new(),
                Arc::new(ExpressionEngine::new()),
                Arc::new(SecretStore::new()),
            )))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let (_, result) = next(StepContext::new(dir.path())).await;
        assert!(matches!(result, Err(StepError::Timeout)));
    }

    #[tokio::test]
    async fn test_malformed_file_fails_successful_step() {
        let dir = TempDir::new().unwrap();
        let body = Arc::new(FnInterceptor::new(|ctx: StepContext| async move {
            std::fs::write(ctx.env_file.clone().unwrap(), "NOT VALID LINE\n").unwrap();
            (ctx, Ok(()))
        }));
        let next = InterceptorChain::new()
            .with(Arc::new(EnvVars::new(
                Vec::new(),
                HashMap::new(),
                HashMap::new(),
                Arc::new(ExpressionEngine::new()),
            )))
            .with(body)
            .build(&test_pipeline())
            .unwrap();

        let (_, result) = next(StepContext::new(dir.path())).await;
        assert!(matches!(result, Err(StepError::Variables { .. })));
    }
}
