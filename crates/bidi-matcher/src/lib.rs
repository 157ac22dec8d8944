//! Structural comparison of JSON trees for protocol tests.
//!
//! Expected values are [`Pattern`]s: literals, wildcards (`any_string()`, `number_between()`,
//! `any_uuid()`, ...), object nodes that are either exact or *extending*, and arrays. Extending
//! objects tolerate extra keys in the actual value; arrays never do and always match
//! length-for-length.

pub mod check;
pub mod pattern;
pub mod sort;

pub use check::{check, matches, values_equal, Mismatch, MismatchReason};
pub use pattern::{
    any_bool, any_number, any_string, any_uuid, any_value, array, number_between, object,
    predicate, Mode, Pattern, TemplateError, Wildcard,
};
pub use sort::{cmp_values, lookup, sort_messages};

use serde_json::Value;

/// Deep equality; wildcards are not recognised, `expected` is taken literally.
pub fn compare_exact(expected: Value, actual: &Value) -> Result<(), Mismatch> {
    check(&Pattern::exact(expected), actual)
}

/// Subset match for objects at every depth, exact length match for arrays.
pub fn compare_extending(expected: Value, actual: &Value) -> Result<(), Mismatch> {
    check(&Pattern::extending(expected), actual)
}
