//! Substitution over whole documents: strings, lists and maps.

use super::{substitute_tokens, ExpressionEngine};
use crate::context::{expression_view, token_index, StepContext};
use crate::errors::ExpressionError;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn expression_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\{([^}]+)\}\}").expect("expression pattern is valid"))
}

/// Resolves `$(name)` tokens and `${{ expr }}` expressions against one
/// context snapshot.
pub struct Substitutor<'a> {
    engine: &'a ExpressionEngine,
    view: Value,
    index: HashMap<String, String>,
}

impl<'a> Substitutor<'a> {
    /// Captures the view of `ctx`.
    #[must_use]
    pub fn new(engine: &'a ExpressionEngine, ctx: &StepContext) -> Self {
        let view = expression_view(ctx);
        let index = token_index(&view);
        Self {
            engine,
            view,
            index,
        }
    }

    /// The captured expression view.
    #[must_use]
    pub const fn view(&self) -> &Value {
        &self.view
    }

    /// Resolves every string in a document. Map keys are kept as is.
    pub fn resolve(&self, document: &Value) -> Result<Value, ExpressionError> {
        match document {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve(value)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolves a single string.
    ///
    /// A string consisting of exactly one expression keeps the expression's
    /// native type; otherwise every result is spliced in as text. Tokens are
    /// only substituted in the text between expressions, so substituted values
    /// are never evaluated. The first failing expression aborts the scan.
    pub fn resolve_str(&self, input: &str) -> Result<Value, ExpressionError> {
        let pattern = expression_pattern();

        match pattern.captures(input) {
            Some(caps) if caps[0].len() == input.len() => {
                return self.engine.evaluate(caps[1].trim(), &self.view);
            }
            Some(_) => {}
            None => return Ok(Value::String(substitute_tokens(input, &self.index))),
        }

        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in pattern.captures_iter(input) {
            let Some(whole) = caps.get(0) else { continue };
            let value = self.engine.evaluate(caps[1].trim(), &self.view)?;
            out.push_str(&substitute_tokens(&input[last..whole.start()], &self.index));
            out.push_str(&coerce(&value));
            last = whole.end();
        }
        out.push_str(&substitute_tokens(&input[last..], &self.index));

        Ok(Value::String(out))
    }

    /// Resolves a string and coerces the result to text.
    pub fn resolve_string(&self, input: &str) -> Result<String, ExpressionError> {
        self.resolve_str(input).map(|v| coerce(&v))
    }
}

impl std::fmt::Debug for Substitutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substitutor")
            .field("keys", &self.index.len())
            .finish_non_exhaustive()
    }
}

/// Renders a value as text for splicing.
#[must_use]
pub fn coerce(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
