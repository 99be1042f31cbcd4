//! Parsing of declared pipeline inputs.

use super::{InputSpec, InputType};
use crate::context::ParamValue;
use crate::errors::{PipelineValidationError, StepError};
use std::collections::HashMap;

/// Parses the values supplied for a pipeline's declared inputs.
///
/// Supplied strings are converted to the declared type: `string-slice`
/// values are split on `,` and `bool` values are parsed. A missing input
/// takes its default, or the zero value of its type unless it is required.
/// Undeclared values are ignored.
pub fn parse_inputs(
    declared: &[InputSpec],
    supplied: &HashMap<String, ParamValue>,
) -> Result<HashMap<String, ParamValue>, StepError> {
    let mut parsed = HashMap::with_capacity(declared.len());

    for input in declared {
        let value = match (supplied.get(&input.name), &input.default) {
            (Some(value), _) => convert(input, value)?,
            (None, Some(default)) => ParamValue::from_json(default)
                .ok_or_else(|| invalid(input, format!("unsupported default {default}")))?,
            (None, None) if input.required => {
                return Err(invalid(input, "missing required input").into());
            }
            (None, None) => zero(input.kind),
        };
        parsed.insert(input.name.clone(), value);
    }

    Ok(parsed)
}

/// Parses raw string values, e.g. from command line flags.
pub fn parse_raw_inputs(
    declared: &[InputSpec],
    raw: &HashMap<String, String>,
) -> Result<HashMap<String, ParamValue>, StepError> {
    let supplied = raw
        .iter()
        .map(|(k, v)| (k.clone(), ParamValue::String(v.clone())))
        .collect();
    parse_inputs(declared, &supplied)
}

fn convert(input: &InputSpec, value: &ParamValue) -> Result<ParamValue, PipelineValidationError> {
    match (input.kind, value) {
        (InputType::String, ParamValue::Array(values)) => Ok(ParamValue::String(values.join(","))),
        (InputType::String, ParamValue::Bool(b)) => Ok(ParamValue::String(b.to_string())),
        (InputType::StringSlice, ParamValue::String(s)) => Ok(ParamValue::Array(
            s.split(',').map(ToString::to_string).collect(),
        )),
        (InputType::StringSlice, ParamValue::Bool(b)) => Ok(ParamValue::Array(vec![b.to_string()])),
        (InputType::Bool, ParamValue::String(s)) => parse_bool(s)
            .map(ParamValue::Bool)
            .ok_or_else(|| invalid(input, format!("{s:?} is not a boolean"))),
        (InputType::Bool, ParamValue::Array(_)) => Err(invalid(input, "a list is not a boolean")),
        _ => Ok(value.clone()),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

const fn zero(kind: InputType) -> ParamValue {
    match kind {
        InputType::String => ParamValue::String(String::new()),
        InputType::StringSlice => ParamValue::Array(Vec::new()),
        InputType::Bool => ParamValue::Bool(false),
    }
}

fn invalid(input: &InputSpec, reason: impl std::fmt::Display) -> PipelineValidationError {
    PipelineValidationError::invalid_input(&input.name, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn declared() -> Vec<InputSpec> {
        vec![
            InputSpec::new("name", InputType::String),
            InputSpec::new("targets", InputType::StringSlice),
            InputSpec::new("verbose", InputType::Bool),
        ]
    }

    #[test]
    fn test_parses_by_type() {
        let parsed = parse_raw_inputs(
            &declared(),
            &raw(&[("name", "ci"), ("targets", "a,b"), ("verbose", "true"), ("other", "x")]),
        )
        .unwrap();

        assert_eq!(parsed["name"], ParamValue::string("ci"));
        assert_eq!(parsed["targets"], ParamValue::array(["a", "b"]));
        assert_eq!(parsed["verbose"], ParamValue::Bool(true));
        assert!(!parsed.contains_key("other"));
    }

    #[test]
    fn test_defaults_and_zero_values() {
        let mut inputs = declared();
        inputs[1] = InputSpec::new("targets", InputType::StringSlice).with_default(json!(["x"]));

        let parsed = parse_raw_inputs(&inputs, &HashMap::new()).unwrap();
        assert_eq!(parsed["name"], ParamValue::string(""));
        assert_eq!(parsed["targets"], ParamValue::array(["x"]));
        assert_eq!(parsed["verbose"], ParamValue::Bool(false));
    }

    #[test]
    fn test_missing_required_input() {
        let inputs = vec![InputSpec::new("token", InputType::String).required()];
        let err = parse_raw_inputs(&inputs, &HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "invalid input `token`: missing required input");
    }

    #[test]
    fn test_invalid_bool() {
        let err = parse_raw_inputs(&declared(), &raw(&[("verbose", "maybe")])).unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
    }

    #[test]
    fn test_typed_values_pass_through() {
        let supplied = HashMap::from([
            ("targets".to_string(), ParamValue::array(["a"])),
            ("verbose".to_string(), ParamValue::Bool(true)),
        ]);
        let parsed = parse_inputs(&declared(), &supplied).unwrap();
        assert_eq!(parsed["targets"], ParamValue::array(["a"]));
        assert_eq!(parsed["verbose"], ParamValue::Bool(true));
    }
}
