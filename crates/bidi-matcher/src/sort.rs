use std::cmp::Ordering;

use serde_json::Value;

/// Total order over JSON values: null < boolean < number < string < array < object.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.total_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| cmp_values(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Value at a dotted path such as `params.context`; array segments are indices.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Stable sort of messages by the given dotted keys, in priority order.
///
/// Useful when several events race each other and only the set, not the arrival order,
/// is under test. Missing keys sort first.
pub fn sort_messages(messages: &mut [Value], keys: &[&str]) {
    messages.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let a = lookup(a, key).unwrap_or(&Value::Null);
                let b = lookup(b, key).unwrap_or(&Value::Null);
                cmp_values(a, b)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_by_method_then_context() {
        let mut events = vec![
            json!({ "method": "b", "params": { "context": "2" } }),
            json!({ "method": "a", "params": { "context": "9" } }),
            json!({ "method": "b", "params": { "context": "1" } }),
            json!({ "id": 4 }),
        ];
        sort_messages(&mut events, &["method", "params.context"]);
        assert_eq!(
            events,
            vec![
                json!({ "id": 4 }),
                json!({ "method": "a", "params": { "context": "9" } }),
                json!({ "method": "b", "params": { "context": "1" } }),
                json!({ "method": "b", "params": { "context": "2" } }),
            ]
        );
    }

    #[test]
    fn lookup_walks_arrays() {
        let value = json!({ "result": { "contexts": [{ "context": "x" }] } });
        assert_eq!(
            lookup(&value, "result.contexts.0.context"),
            Some(&json!("x"))
        );
        assert_eq!(lookup(&value, "result.missing"), None);
    }

    #[test]
    fn numbers_order_numerically() {
        assert_eq!(cmp_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(cmp_values(&json!(1.5), &json!(1)), Ordering::Greater);
        assert_eq!(cmp_values(&json!(null), &json!(false)), Ordering::Less);
    }
}
