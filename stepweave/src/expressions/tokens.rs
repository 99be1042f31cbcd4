//! `$(name)` token substitution.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$(\$?)\(([^()]+)\)").expect("token pattern is valid"))
}

/// Replaces every `$(name)` with its value from `index`.
///
/// `$$(name)` renders as the literal `$(name)` without lookup. Tokens with no
/// entry in the index are left untouched.
#[must_use]
pub fn substitute_tokens(input: &str, index: &HashMap<String, String>) -> String {
    if !input.contains("$(") {
        return input.to_string();
    }

    pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[2];
            if !caps[1].is_empty() {
                return format!("$({name})");
            }
            index
                .get(name.trim())
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
