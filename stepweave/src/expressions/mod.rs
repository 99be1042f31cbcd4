//! Token and expression substitution.
//!
//! Two template mechanisms run over string fields of a step:
//! - `$(name)` tokens, looked up in the flattened context view
//! - `${{ expr }}` expressions, evaluated against the typed context view

mod document;
mod engine;
mod tokens;

pub use document::{coerce, Substitutor};
pub use engine::ExpressionEngine;
pub use tokens::substitute_tokens;
