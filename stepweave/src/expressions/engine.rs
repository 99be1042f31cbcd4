//! The embedded expression language.

use crate::errors::ExpressionError;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

/// Compiles and evaluates `${{ expr }}` bodies and `if` conditions.
///
/// Expressions use the minijinja expression syntax and are evaluated against
/// the view built by [`expression_view`](crate::context::expression_view).
/// Referencing an undefined attribute is an error.
#[derive(Debug)]
pub struct ExpressionEngine {
    env: Environment<'static>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine {
    /// Creates an engine with strict undefined handling.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Checks that an expression compiles.
    pub fn compile(&self, expression: &str) -> Result<(), ExpressionError> {
        self.env
            .compile_expression(expression)
            .map(|_| ())
            .map_err(|e| ExpressionError::Compile {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }

    /// Evaluates an expression to a JSON value.
    pub fn evaluate(&self, expression: &str, view: &Value) -> Result<Value, ExpressionError> {
        let compiled =
            self.env
                .compile_expression(expression)
                .map_err(|e| ExpressionError::Compile {
                    expression: expression.to_string(),
                    message: e.to_string(),
                })?;

        let evaluate_error = |message: String| ExpressionError::Evaluate {
            expression: expression.to_string(),
            message,
        };

        let value = compiled
            .eval(view)
            .map_err(|e| evaluate_error(e.to_string()))?;

        if value.is_undefined() {
            return Ok(Value::Null);
        }

        serde_json::to_value(&value).map_err(|e| evaluate_error(e.to_string()))
    }

    /// Evaluates an expression that must produce a boolean.
    pub fn evaluate_bool(&self, expression: &str, view: &Value) -> Result<bool, ExpressionError> {
        match self.evaluate(expression, view)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::NotBoolean {
                expression: expression.to_string(),
                found: kind(&other).to_string(),
            }),
        }
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
