//! The read-only view of a context seen by expressions and token substitution.

use super::StepContext;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Builds the typed view expressions are evaluated against.
///
/// Everything lives under a top-level `context` key, e.g.
/// `context.envs.FOO` or `context.steps.build.outputs.version`.
#[must_use]
pub fn expression_view(ctx: &StepContext) -> Value {
    let tags: Map<String, Value> = ctx
        .tags
        .iter()
        .map(|t| (t.key.clone(), Value::String(t.value.clone())))
        .collect();

    let outputs: Map<String, Value> = ctx
        .outputs
        .iter()
        .map(|o| (o.name.clone(), json!({ "path": o.path })))
        .collect();

    let inputs: Map<String, Value> = ctx
        .inputs
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();

    json!({
        "context": {
            "dir": ctx.dir,
            "dataDir": ctx.data_dir,
            "namePrefix": ctx.name_prefix,
            "inputs": inputs,
            "envs": ctx.envs,
            "secrets": ctx.secrets,
            "matrix": ctx.matrix,
            "steps": ctx.steps,
            "containers": ctx.containers,
            "tags": tags,
            "env": ctx.env_file,
            "secret": ctx.secret_file,
            "output": ctx.output_file,
            "outputs": outputs,
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    })
}

/// Flattens a view into dotted keys for `$(name)` substitution.
///
/// Lists are joined with `,`; nulls are skipped.
#[must_use]
pub fn token_index(view: &Value) -> HashMap<String, String> {
    let mut index = HashMap::new();
    flatten(String::new(), view, &mut index);
    index
}

fn flatten(path: String, value: &Value, index: &mut HashMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            index.insert(path, b.to_string());
        }
        Value::Number(n) => {
            index.insert(path, n.to_string());
        }
        Value::String(s) => {
            index.insert(path, s.clone());
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            index.insert(path, joined);
        }
        Value::Object(map) => {
            for (key, value) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten(child, value, index);
            }
        }
    }
}
