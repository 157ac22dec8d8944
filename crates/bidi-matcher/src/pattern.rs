use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// How object nodes built from a plain JSON value treat keys the pattern does not name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Extra keys are a mismatch.
    Exact,
    /// Extra keys are ignored. Arrays still match length-for-length.
    Extending,
}

/// Placeholder that accepts any concrete value satisfying a predicate.
#[derive(Clone)]
pub enum Wildcard {
    AnyValue,
    AnyString,
    AnyNumber,
    /// Exclusive on both ends.
    NumberInRange { lo: f64, hi: f64 },
    AnyUuid,
    AnyBool,
    Predicate {
        name: String,
        check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    },
}

impl Wildcard {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Wildcard::AnyValue => true,
            Wildcard::AnyString => value.is_string(),
            Wildcard::AnyNumber => value.is_number(),
            Wildcard::NumberInRange { lo, hi } => value
                .as_f64()
                .map_or(false, |number| *lo < number && number < *hi),
            Wildcard::AnyUuid => value.as_str().map_or(false, is_uuid),
            Wildcard::AnyBool => value.is_boolean(),
            Wildcard::Predicate { check, .. } => check(value),
        }
    }
}

impl fmt::Debug for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wildcard::AnyValue => f.write_str("any value"),
            Wildcard::AnyString => f.write_str("any string"),
            Wildcard::AnyNumber => f.write_str("any number"),
            Wildcard::NumberInRange { lo, hi } => write!(f, "any number in ({lo}, {hi})"),
            Wildcard::AnyUuid => f.write_str("any uuid"),
            Wildcard::AnyBool => f.write_str("any boolean"),
            Wildcard::Predicate { name, .. } => write!(f, "{name}"),
        }
    }
}

fn is_uuid(text: &str) -> bool {
    text.len() == 36 && Uuid::try_parse(text).is_ok()
}

/// Expected-value tree for structural comparison.
#[derive(Clone, Debug)]
pub enum Pattern {
    Literal(Value),
    Any(Wildcard),
    Object {
        fields: BTreeMap<String, Pattern>,
        extending: bool,
    },
    Array(Vec<Pattern>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown wildcard {0:?}")]
    UnknownWildcard(String),
    #[error("$range expects [lo, hi] numbers, got {0}")]
    BadRange(String),
    #[error("unknown template marker {0}")]
    UnknownMarker(String),
}

impl Pattern {
    /// Every object in `value` must match key-for-key.
    pub fn exact(value: Value) -> Self {
        Self::from_value(value, Mode::Exact)
    }

    /// Every object in `value` may carry extra keys in the actual tree.
    pub fn extending(value: Value) -> Self {
        Self::from_value(value, Mode::Extending)
    }

    pub fn from_value(value: Value, mode: Mode) -> Self {
        match value {
            Value::Object(map) => Pattern::Object {
                fields: map
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_value(value, mode)))
                    .collect(),
                extending: mode == Mode::Extending,
            },
            Value::Array(items) => Pattern::Array(
                items
                    .into_iter()
                    .map(|item| Self::from_value(item, mode))
                    .collect(),
            ),
            scalar => Pattern::Literal(scalar),
        }
    }

    /// Builds a pattern from JSON that may contain marker objects:
    ///
    /// * `{"$any": "string" | "number" | "uuid" | "boolean" | "value"}`
    /// * `{"$range": [lo, hi]}`
    /// * `{"$extending": <json>}` and `{"$exact": <json>}` switch mode for the subtree
    pub fn from_template(value: Value, mode: Mode) -> Result<Self, TemplateError> {
        match value {
            Value::Object(map) => {
                if let Some(pattern) = Self::marker(&map)? {
                    return Ok(pattern);
                }
                let mut fields = BTreeMap::new();
                for (key, value) in map {
                    fields.insert(key, Self::from_template(value, mode)?);
                }
                Ok(Pattern::Object {
                    fields,
                    extending: mode == Mode::Extending,
                })
            }
            Value::Array(items) => items
                .into_iter()
                .map(|item| Self::from_template(item, mode))
                .collect::<Result<Vec<_>, _>>()
                .map(Pattern::Array),
            scalar => Ok(Pattern::Literal(scalar)),
        }
    }

    fn marker(map: &Map<String, Value>) -> Result<Option<Self>, TemplateError> {
        if map.len() != 1 {
            return Ok(None);
        }
        let Some((key, value)) = map.iter().next() else {
            return Ok(None);
        };
        if !key.starts_with('$') {
            return Ok(None);
        }
        let pattern = match key.as_str() {
            "$any" => {
                let name = value.as_str().unwrap_or_default();
                Pattern::Any(match name {
                    "value" => Wildcard::AnyValue,
                    "string" => Wildcard::AnyString,
                    "number" => Wildcard::AnyNumber,
                    "uuid" => Wildcard::AnyUuid,
                    "boolean" => Wildcard::AnyBool,
                    _ => return Err(TemplateError::UnknownWildcard(value.to_string())),
                })
            }
            "$range" => {
                let bounds = value
                    .as_array()
                    .filter(|bounds| bounds.len() == 2)
                    .and_then(|bounds| Some((bounds[0].as_f64()?, bounds[1].as_f64()?)));
                match bounds {
                    Some((lo, hi)) => number_between(lo, hi),
                    None => return Err(TemplateError::BadRange(value.to_string())),
                }
            }
            "$extending" => Self::from_template(value.clone(), Mode::Extending)?,
            "$exact" => Self::from_template(value.clone(), Mode::Exact)?,
            other => return Err(TemplateError::UnknownMarker(other.to_string())),
        };
        Ok(Some(pattern))
    }
}

impl From<Value> for Pattern {
    fn from(value: Value) -> Self {
        Pattern::exact(value)
    }
}

impl From<Wildcard> for Pattern {
    fn from(wildcard: Wildcard) -> Self {
        Pattern::Any(wildcard)
    }
}

pub fn any_value() -> Pattern {
    Pattern::Any(Wildcard::AnyValue)
}

pub fn any_string() -> Pattern {
    Pattern::Any(Wildcard::AnyString)
}

pub fn any_number() -> Pattern {
    Pattern::Any(Wildcard::AnyNumber)
}

pub fn number_between(lo: f64, hi: f64) -> Pattern {
    Pattern::Any(Wildcard::NumberInRange { lo, hi })
}

pub fn any_uuid() -> Pattern {
    Pattern::Any(Wildcard::AnyUuid)
}

pub fn any_bool() -> Pattern {
    Pattern::Any(Wildcard::AnyBool)
}

pub fn predicate<F>(name: impl Into<String>, check: F) -> Pattern
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Pattern::Any(Wildcard::Predicate {
        name: name.into(),
        check: Arc::new(check),
    })
}

/// Object pattern from explicit field patterns.
pub fn object<I, K>(fields: I, extending: bool) -> Pattern
where
    I: IntoIterator<Item = (K, Pattern)>,
    K: Into<String>,
{
    Pattern::Object {
        fields: fields
            .into_iter()
            .map(|(key, pattern)| (key.into(), pattern))
            .collect(),
        extending,
    }
}

pub fn array<I>(items: I) -> Pattern
where
    I: IntoIterator<Item = Pattern>,
{
    Pattern::Array(items.into_iter().collect())
}
