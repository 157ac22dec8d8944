use serde_json::Value;
use thiserror::Error;

use crate::pattern::Pattern;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum MismatchReason {
    #[error("expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
    #[error("expected {expected}, found {found}")]
    Literal { expected: Value, found: Value },
    #[error("missing key")]
    MissingKey,
    #[error("unexpected key")]
    UnexpectedKey,
    #[error("expected {expected} elements, found {found}")]
    Length { expected: usize, found: usize },
    #[error("{wildcard} does not accept {found}")]
    Wildcard { wildcard: String, found: Value },
}

/// First difference found between a pattern and an actual value.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("at {path}: {reason}")]
pub struct Mismatch {
    /// JSON path of the failing node, e.g. `$.result.contexts[0].url`.
    pub path: String,
    pub reason: MismatchReason,
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON equality where numbers compare by value, so `1` equals `1.0`.
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (a.as_u64(), b.as_u64()) {
                (Some(a), Some(b)) => a == b,
                _ => a.as_f64() == b.as_f64(),
            },
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, a)| b.get(key).map_or(false, |b| values_equal(a, b)))
        }
        (a, b) => a == b,
    }
}

/// Walks `pattern` and `actual` together and reports the first mismatch.
pub fn check(pattern: &Pattern, actual: &Value) -> Result<(), Mismatch> {
    let mut path = String::from("$");
    walk(pattern, actual, &mut path)
}

pub fn matches(pattern: &Pattern, actual: &Value) -> bool {
    check(pattern, actual).is_ok()
}

fn fail(path: &str, reason: MismatchReason) -> Result<(), Mismatch> {
    Err(Mismatch {
        path: path.to_string(),
        reason,
    })
}

fn walk(pattern: &Pattern, actual: &Value, path: &mut String) -> Result<(), Mismatch> {
    match pattern {
        Pattern::Any(wildcard) => {
            if wildcard.accepts(actual) {
                Ok(())
            } else {
                fail(
                    path,
                    MismatchReason::Wildcard {
                        wildcard: wildcard.to_string(),
                        found: actual.clone(),
                    },
                )
            }
        }
        Pattern::Literal(expected) => {
            if kind(expected) != kind(actual) {
                return fail(
                    path,
                    MismatchReason::Type {
                        expected: kind(expected),
                        found: kind(actual),
                    },
                );
            }
            if values_equal(expected, actual) {
                Ok(())
            } else {
                fail(
                    path,
                    MismatchReason::Literal {
                        expected: expected.clone(),
                        found: actual.clone(),
                    },
                )
            }
        }
        Pattern::Array(items) => {
            let Value::Array(actual_items) = actual else {
                return fail(
                    path,
                    MismatchReason::Type {
                        expected: "array",
                        found: kind(actual),
                    },
                );
            };
            if items.len() != actual_items.len() {
                return fail(
                    path,
                    MismatchReason::Length {
                        expected: items.len(),
                        found: actual_items.len(),
                    },
                );
            }
            for (index, (item, actual_item)) in items.iter().zip(actual_items).enumerate() {
                let len = path.len();
                path.push_str(&format!("[{index}]"));
                walk(item, actual_item, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        Pattern::Object { fields, extending } => {
            let Value::Object(actual_fields) = actual else {
                return fail(
                    path,
                    MismatchReason::Type {
                        expected: "object",
                        found: kind(actual),
                    },
                );
            };
            for (key, field) in fields {
                let len = path.len();
                push_key(path, key);
                match actual_fields.get(key) {
                    Some(actual_field) => walk(field, actual_field, path)?,
                    None => return fail(path, MismatchReason::MissingKey),
                }
                path.truncate(len);
            }
            if !extending {
                if let Some(extra) = actual_fields.keys().find(|key| !fields.contains_key(*key)) {
                    push_key(path, extra);
                    return fail(path, MismatchReason::UnexpectedKey);
                }
            }
            Ok(())
        }
    }
}

fn push_key(path: &mut String, key: &str) {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if plain {
        path.push('.');
        path.push_str(key);
    } else {
        path.push_str(&format!("[{key:?}]"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{any_string, object};
    use serde_json::json;

    #[test]
    fn integer_and_float_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!(1.5)));
        assert!(values_equal(&json!({ "a": [1, 2.0] }), &json!({ "a": [1.0, 2] })));
    }

    #[test]
    fn paths_name_the_failing_node() {
        let pattern = Pattern::exact(json!({ "result": { "contexts": [{ "url": "a" }] } }));
        let err = check(
            &pattern,
            &json!({ "result": { "contexts": [{ "url": "b" }] } }),
        )
        .unwrap_err();
        assert_eq!(err.path, "$.result.contexts[0].url");
        assert!(matches!(err.reason, MismatchReason::Literal { .. }));
    }

    #[test]
    fn odd_keys_are_quoted() {
        let pattern = object([("goog:channel", any_string())], false);
        let err = check(&pattern, &json!({})).unwrap_err();
        assert_eq!(err.path, "$[\"goog:channel\"]");
        assert_eq!(err.reason, MismatchReason::MissingKey);
        assert_eq!(err.to_string(), "at $[\"goog:channel\"]: missing key");
    }
}
