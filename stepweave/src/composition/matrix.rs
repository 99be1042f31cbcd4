//! Matrix expansion.

use super::fan_in;
use crate::cancellation::BranchGroup;
use crate::context::{prefix_name, OutputParam, ParamValue, StepContext, StepResult, Tag};
use crate::errors::StepError;
use crate::expressions::{coerce, ExpressionEngine, Substitutor};
use crate::interceptors::{
    create_var_file, keep_step_error, parse_var_file, priority, wrap, Interceptor, Next, StepOutput,
};
use crate::pipeline::{MatrixSpec, Pipeline};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One parameter combination.
pub type Combination = BTreeMap<String, String>;

/// Expands parameters into their Cartesian product.
///
/// Each combination is keyed by its values joined with `-`, in parameter
/// order. Combinations carrying a value listed in an include group get that
/// group's parameters added.
#[must_use]
pub fn combinations(
    params: &BTreeMap<String, ParamValue>,
    include: &[BTreeMap<String, String>],
) -> BTreeMap<String, Combination> {
    let keys: Vec<&String> = params.keys().collect();
    let mut result = BTreeMap::new();
    expand(params, &keys, 0, &mut Combination::new(), &mut result);

    for combination in result.values_mut() {
        combine_includes(combination, include);
    }
    result
}

fn expand(
    params: &BTreeMap<String, ParamValue>,
    keys: &[&String],
    index: usize,
    current: &mut Combination,
    result: &mut BTreeMap<String, Combination>,
) {
    let Some(key) = keys.get(index) else {
        let id = keys
            .iter()
            .filter_map(|k| current.get(*k).cloned())
            .collect::<Vec<_>>()
            .join("-");
        result.insert(id, current.clone());
        return;
    };

    for value in params[*key].values() {
        current.insert((*key).clone(), value);
        expand(params, keys, index + 1, current, result);
    }
    current.remove(*key);
}

fn combine_includes(combination: &mut Combination, include: &[BTreeMap<String, String>]) {
    let original = combination.clone();
    for group in include {
        let matches = original
            .iter()
            .any(|(key, value)| group.get(key) == Some(value));
        if matches {
            combination.extend(group.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}

fn branch_prefix(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    hex::encode(digest)[..6].to_string()
}

/// Runs the continuation once per parameter combination, concurrently.
///
/// Inside a matrix branch the expansion is skipped. Each branch gets its own
/// name prefix, `matrix/<key>` tags and ledger entry `<prefix>-<step>`;
/// branch outputs are unified into list outputs on the step's own entry.
pub struct Matrix {
    step: String,
    spec: MatrixSpec,
    engine: Arc<ExpressionEngine>,
    max_concurrent: Option<usize>,
}

impl Matrix {
    /// Creates the expansion.
    #[must_use]
    pub fn new(step: impl Into<String>, spec: MatrixSpec, engine: Arc<ExpressionEngine>) -> Self {
        Self {
            step: step.into(),
            spec,
            engine,
            max_concurrent: None,
        }
    }

    /// Bounds the number of branches running at once.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: Option<usize>) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    fn resolve(&self, ctx: &StepContext) -> Result<MatrixSpec, StepError> {
        let substitutor = Substitutor::new(&self.engine, ctx);

        let mut params = BTreeMap::new();
        for (key, value) in &self.spec.params {
            let resolved = substitutor.resolve(&value.to_json())?;
            let value =
                ParamValue::from_json(&resolved).unwrap_or_else(|| ParamValue::String(coerce(&resolved)));
            params.insert(key.clone(), value);
        }

        let mut include = Vec::with_capacity(self.spec.include.len());
        for group in &self.spec.include {
            let mut resolved = BTreeMap::new();
            for (key, value) in group {
                resolved.insert(key.clone(), substitutor.resolve_string(value)?);
            }
            include.push(resolved);
        }

        Ok(MatrixSpec {
            params,
            include,
            fail_fast: self.spec.fail_fast,
        })
    }

    fn branch_context(&self, ctx: &StepContext, id: &str, combination: Combination) -> StepContext {
        let mut branch = ctx.deep_copy();
        for (key, value) in &combination {
            branch.with_tag(Tag::new(format!("matrix/{key}"), value.clone()));
        }
        branch.matrix = combination;
        branch.name_prefix = prefix_name(&branch.name_prefix, &branch_prefix(id));
        branch
    }

    /// Folds a finished branch into the parent: new ledger entries are copied
    /// with the branch prefix and their outputs unified on the step's entry.
    fn merge_branch(&self, ctx: &mut StepContext, branch: &StepContext) {
        for (name, entry) in &branch.steps {
            if name != &self.step && ctx.steps.contains_key(name) {
                continue;
            }

            ctx.steps
                .insert(prefix_name(name, &branch.name_prefix), entry.clone());

            let parent = ctx
                .steps
                .entry(self.step.clone())
                .or_insert_with(StepResult::started);
            for (key, value) in &entry.outputs {
                let unified = parent
                    .outputs
                    .entry(key.clone())
                    .or_insert_with(|| ParamValue::Array(Vec::new()));
                for v in value.values().into_iter().filter(|v| !v.is_empty()) {
                    unified.push(v);
                }
            }
        }
        extend_missing(&mut ctx.containers, &branch.containers, &branch.name_prefix);
    }

    async fn call(self: Arc<Self>, mut ctx: StepContext, next: Next) -> StepOutput {
        if !ctx.matrix.is_empty() {
            return next(ctx).await;
        }

        let spec = match self.resolve(&ctx) {
            Ok(spec) => spec,
            Err(err) => return (ctx, Err(err)),
        };
        let expanded = combinations(&spec.params, &spec.include);
        if expanded.is_empty() {
            return (ctx, Err(StepError::EmptyMatrix));
        }
        debug!(step = %self.step, branches = expanded.len(), "matrix expanded");

        let mut group = BranchGroup::new(&ctx.cancel, self.max_concurrent);
        for (id, combination) in expanded {
            let branch = self.branch_context(&ctx, &id, combination);
            let step = self.step.clone();
            let next = Arc::clone(&next);
            group.spawn(id, move |token| run_branch(step, next, branch.with_cancel(token)));
        }

        let errors = fan_in(&mut group, spec.fail_fast, |_, branch| {
            self.merge_branch(&mut ctx, &branch);
        })
        .await;

        match StepError::join(errors) {
            Some(err) => (ctx, Err(err)),
            None => (ctx, Ok(())),
        }
    }
}

fn extend_missing<V: Clone>(into: &mut HashMap<String, V>, from: &HashMap<String, V>, prefix: &str) {
    for (key, value) in from {
        if !into.contains_key(key) {
            into.insert(prefix_name(key, prefix), value.clone());
        }
    }
}

/// Runs one branch with its own ledger entry and variables files.
async fn run_branch(step: String, next: Next, mut ctx: StepContext) -> StepOutput {
    let output_file = match create_var_file(ctx.tmp_dir(), "output") {
        Ok(file) => file,
        Err(err) => return (ctx, Err(err)),
    };

    let mut declared = Vec::with_capacity(ctx.outputs.len());
    for output in &ctx.outputs {
        match create_var_file(ctx.tmp_dir(), &output.name) {
            Ok(file) => declared.push((output.name.clone(), file)),
            Err(err) => return (ctx, Err(err)),
        }
    }

    ctx.output_file = Some(output_file.path().to_path_buf());
    ctx.outputs = declared
        .iter()
        .map(|(name, file)| OutputParam {
            name: name.clone(),
            path: file.path().to_path_buf(),
        })
        .collect();
    ctx.output_vars.clear();
    ctx.steps.insert(step.clone(), StepResult::started());

    let (mut ctx, mut result) = next(ctx).await;

    let mut outputs: HashMap<String, ParamValue> = HashMap::new();
    match parse_var_file(output_file.path()) {
        Ok(vars) => outputs.extend(vars.into_iter().map(|(k, v)| (k, ParamValue::String(v)))),
        Err(err) => keep_step_error(&mut result, err),
    }
    for (name, file) in &declared {
        match std::fs::read_to_string(file.path()) {
            Ok(raw) if !raw.trim().is_empty() => {
                outputs.insert(name.clone(), ParamValue::parse_output(&raw));
            }
            Ok(_) => {}
            Err(err) => keep_step_error(&mut result, err.into()),
        }
    }
    outputs.extend(std::mem::take(&mut ctx.output_vars));

    let entry = ctx.steps.entry(step).or_insert_with(StepResult::started);
    entry.outputs.extend(outputs);
    entry.seal(&result);

    (ctx, result)
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("step", &self.step)
            .field("spec", &self.spec)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl Interceptor for Matrix {
    fn name(&self) -> &'static str {
        "matrix"
    }

    fn priority(&self) -> i32 {
        priority::MATRIX
    }

    fn bootstrap(self: Arc<Self>, _: &Arc<Pipeline>, next: Next) -> Result<Next, StepError> {
        Ok(wrap(self, next, Self::call))
    }
}
