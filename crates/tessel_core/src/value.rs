//! Slot value helpers
//!
//! Slot values are plain `serde_json::Value`s. The pattern language and the
//! comparison operators need a handful of loosely-typed rules on top of them
//! (truthiness, display strings, string-to-primitive coercion); they all live here.

use serde_json::{Number, Value};

/// Whether a value counts as "true" in a condition.
///
/// `null`, `false`, `0`, `NaN` and `""` are falsy. Arrays and objects are
/// always truthy, even when empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Whether a value is "empty" for show/hide style bindings.
///
/// Stricter than [`is_truthy`]: empty arrays and objects are empty too.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        other => !is_truthy(other),
    }
}

/// Render a value the way it appears when concatenated into a string.
///
/// `null` renders as the empty string, integral floats drop their fraction,
/// and structured values fall back to compact JSON.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_string(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn number_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Coerce a string to a primitive when it is recognizably one.
///
/// `"true"`/`"false"` become booleans, `"null"`/`"undefined"` become `null`,
/// and canonical numeric literals become numbers. Anything else stays a string.
pub fn string_to_primitive(s: &str) -> Value {
    match s {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "undefined" => return Value::Null,
        _ => {}
    }

    if let Ok(i) = s.parse::<i64>() {
        if i.to_string() == s {
            return Value::from(i);
        }
    }
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() && f.to_string() == s {
                if let Some(n) = Number::from_f64(f) {
                    return Value::Number(n);
                }
            }
        }
    }

    Value::String(s.to_string())
}

/// Numeric view of a value for loose comparisons
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Loose equality in the spirit of `==`.
///
/// Values of the same kind compare structurally (numbers by value). Mixed
/// primitive kinds compare numerically when both sides convert. `null` only
/// equals `null`.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => a == b,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Strict equality: same kind and same value
pub(crate) fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Look up a dotted path inside a structured value.
///
/// Object segments index by key, array segments by position. Returns `None`
/// as soon as a segment is missing or the current value is a primitive.
pub fn nested_get<'v, S: AsRef<str>>(value: &'v Value, path: &[S]) -> Option<&'v Value> {
    let mut current = value;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_emptiness_is_stricter_for_collections() {
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!([0])));
        assert!(is_empty(&json!(0)));
    }

    #[test]
    fn test_display_string() {
        assert_eq!(display_string(&json!(null)), "");
        assert_eq!(display_string(&json!(2)), "2");
        assert_eq!(display_string(&json!(2.0)), "2");
        assert_eq!(display_string(&json!(2.5)), "2.5");
        assert_eq!(display_string(&json!("x")), "x");
        assert_eq!(display_string(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_string_to_primitive() {
        assert_eq!(string_to_primitive("true"), json!(true));
        assert_eq!(string_to_primitive("undefined"), json!(null));
        assert_eq!(string_to_primitive("42"), json!(42));
        assert_eq!(string_to_primitive("-3"), json!(-3));
        assert_eq!(string_to_primitive("1.5"), json!(1.5));
        // Non-canonical numerals stay strings
        assert_eq!(string_to_primitive("007"), json!("007"));
        assert_eq!(string_to_primitive("2-bar"), json!("2-bar"));
    }

    #[test]
    fn test_loose_eq() {
        assert!(loose_eq(&json!(5), &json!("5")));
        assert!(loose_eq(&json!(true), &json!(1)));
        assert!(loose_eq(&json!("a"), &json!("a")));
        assert!(!loose_eq(&json!(null), &json!(0)));
        assert!(!loose_eq(&json!("a"), &json!("b")));
        assert!(strict_eq(&json!(1), &json!(1.0)));
        assert!(!strict_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn test_nested_get() {
        let value = json!({"me": {"age": 30, "tags": ["a", "b"]}});
        assert_eq!(nested_get(&value, &["me", "age"]), Some(&json!(30)));
        assert_eq!(nested_get(&value, &["me", "tags", "1"]), Some(&json!("b")));
        assert_eq!(nested_get(&value, &["me", "missing"]), None);
        assert_eq!(nested_get(&value, &["me", "age", "x"]), None);
    }
}
