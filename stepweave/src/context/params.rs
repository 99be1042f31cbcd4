//! Typed parameter values for inputs, outputs and matrix parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound to an input, output or matrix parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A boolean value.
    Bool(bool),
    /// A single string value.
    String(String),
    /// A list of strings.
    Array(Vec<String>),
}

impl ParamValue {
    /// Creates a string value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Creates an array value.
    #[must_use]
    pub fn array<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(values.into_iter().map(Into::into).collect())
    }

    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the values this parameter expands to.
    ///
    /// A string or bool expands to itself, an array to its elements.
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Bool(value) => vec![value.to_string()],
            Self::String(value) => vec![value.clone()],
            Self::Array(values) => values.clone(),
        }
    }

    /// Appends a value, turning a scalar into a list first.
    pub fn push(&mut self, value: impl Into<String>) {
        match self {
            Self::Array(values) => values.push(value.into()),
            Self::String(existing) => {
                *self = Self::Array(vec![std::mem::take(existing), value.into()]);
            }
            Self::Bool(existing) => {
                *self = Self::Array(vec![existing.to_string(), value.into()]);
            }
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::String(value) => serde_json::Value::String(value.clone()),
            Self::Array(values) => serde_json::Value::Array(
                values
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        }
    }

    /// Converts a JSON value. Numbers are kept as their string form; objects
    /// and nested lists are rejected.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(value) => Some(Self::Bool(*value)),
            serde_json::Value::String(value) => Some(Self::String(value.clone())),
            serde_json::Value::Number(value) => Some(Self::String(value.to_string())),
            serde_json::Value::Array(values) => values
                .iter()
                .map(|value| match value {
                    serde_json::Value::String(value) => Some(value.clone()),
                    serde_json::Value::Number(value) => Some(value.to_string()),
                    serde_json::Value::Bool(value) => Some(value.to_string()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }

    /// Parses the raw content of an output file: JSON string or list, falling
    /// back to the trimmed text.
    #[must_use]
    pub fn parse_output(raw: &str) -> Self {
        let trimmed = raw.trim();
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => Self::from_json(&value).unwrap_or_else(|| Self::string(trimmed)),
            Err(_) => Self::string(trimmed),
        }
    }
}

impl Default for ParamValue {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        Self::Array(values)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Array(values) => f.write_str(&values.join(",")),
        }
    }
}
