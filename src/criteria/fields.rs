use serde_json::{Map, Value};

use super::Unassessable;
use crate::model::AssessmentErrorKind;

pub fn require_object(value: &Value) -> Result<&Map<String, Value>, Unassessable> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(Unassessable::new(
            AssessmentErrorKind::UnexpectedListFormat,
            "expected a JSON object but the response is a list",
        )),
        other => Err(Unassessable::new(
            AssessmentErrorKind::UnexpectedShape,
            format!("expected a JSON object, found {}", json_type_name(other)),
        )),
    }
}

/// A present, non-null field. JSON `null` counts as missing.
pub fn require_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value, Unassessable> {
    match map.get(key) {
        Some(Value::Null) | None => Err(Unassessable::new(
            AssessmentErrorKind::MissingField,
            format!("missing field `{key}`"),
        )),
        Some(value) => Ok(value),
    }
}

pub fn require_array<'a>(value: &'a Value, key: &str) -> Result<&'a [Value], Unassessable> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Unassessable::new(
            AssessmentErrorKind::UnexpectedShape,
            format!("field `{key}` should be a list, found {}", json_type_name(other)),
        )),
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Integers, integral floats and numeric strings.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|n| n.fract() == 0.0 && n.is_finite())
                .map(|n| n as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn require_number(value: &Value, key: &str) -> Result<f64, Unassessable> {
    as_number(value).ok_or_else(|| {
        Unassessable::new(
            AssessmentErrorKind::NonNumericValue,
            format!("field `{key}` is not numeric: {value}"),
        )
    })
}

/// A fractional number is a shape problem, not a non-numeric one.
pub fn require_integer(value: &Value, key: &str) -> Result<i64, Unassessable> {
    if let Some(integer) = as_integer(value) {
        return Ok(integer);
    }
    let kind = if as_number(value).is_some() {
        AssessmentErrorKind::UnexpectedShape
    } else {
        AssessmentErrorKind::NonNumericValue
    };
    Err(Unassessable::new(
        kind,
        format!("field `{key}` is not an integer: {value}"),
    ))
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub fn text_equals_ignore_case(value: &Value, target: &str) -> bool {
    value
        .as_str()
        .map(|text| text.trim().eq_ignore_ascii_case(target))
        .unwrap_or(false)
}

pub fn text_equals(value: Option<&Value>, target: &str) -> bool {
    value.and_then(Value::as_str) == Some(target)
}

/// First string-valued key out of `keys`, used to name a tool in evidence.
pub fn first_text<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_str))
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_helpers_accept_numbers_and_numeric_strings() {
        assert_eq!(as_integer(&json!(2)), Some(2));
        assert_eq!(as_integer(&json!(2.0)), Some(2));
        assert_eq!(as_integer(&json!(" 3 ")), Some(3));
        assert_eq!(as_integer(&json!(2.5)), None);
        assert_eq!(as_integer(&json!("two")), None);
        assert_eq!(as_number(&json!("1")), Some(1.0));
        assert_eq!(as_number(&json!(true)), None);
    }

    #[test]
    fn require_integer_separates_fractions_from_non_numbers() {
        assert_eq!(require_integer(&json!("4"), "count"), Ok(4));

        let fraction = require_integer(&json!(2.5), "count").expect_err("fraction should fail");
        assert_eq!(fraction.reason, AssessmentErrorKind::UnexpectedShape);

        let text = require_integer(&json!("two"), "count").expect_err("text should fail");
        assert_eq!(text.reason, AssessmentErrorKind::NonNumericValue);
    }

    #[test]
    fn truthy_accepts_bool_and_case_insensitive_string() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("TRUE")));
        assert!(is_truthy(&json!(" true ")));
        assert!(!is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(1)));
    }

    #[test]
    fn null_fields_count_as_missing() {
        let value = json!({"a": null, "b": 0});
        let map = value.as_object().expect("object literal");

        let err = require_field(map, "a").expect_err("null should be missing");
        assert_eq!(err.reason, AssessmentErrorKind::MissingField);
        assert!(require_field(map, "b").is_ok());
    }

    #[test]
    fn require_object_distinguishes_lists_from_other_shapes() {
        let list = require_object(&json!([])).expect_err("list should fail");
        assert_eq!(list.reason, AssessmentErrorKind::UnexpectedListFormat);

        let text = require_object(&json!("x")).expect_err("string should fail");
        assert_eq!(text.reason, AssessmentErrorKind::UnexpectedShape);
    }
}
