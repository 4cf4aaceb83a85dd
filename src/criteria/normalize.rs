use serde_json::{Map, Value};

use super::Unassessable;
use super::fields::json_type_name;
use crate::model::AssessmentErrorKind;

/// Wrapper keys the resolver tool-call judge has been seen to put around its
/// list of tool evaluations. Tried in order.
pub const TOOL_LIST_ALIASES: [&str; 20] = [
    "tools",
    "Tools",
    "tool_calls",
    "toolCalls",
    "ToolCalls",
    "tool_evaluations",
    "toolEvaluations",
    "ToolEvaluations",
    "tool_analysis",
    "toolAnalysis",
    "tool_calls_analysis",
    "toolCallsAnalysis",
    "tool_call_evaluations",
    "toolCallEvaluations",
    "tools_analysis",
    "evaluations",
    "analysis",
    "results",
    "Results",
    "calls",
];

const TOOL_MARKER_KEY: &str = "properlyCalled";

/// Reduces every accepted resolver tool-call shape to a flat list of tool
/// objects. An empty object is a valid "no tools" answer.
pub fn normalize_tool_calls(value: &Value) -> Result<Vec<&Map<String, Value>>, Unassessable> {
    let map = match value {
        Value::Array(items) => return tool_objects(items, "top-level list"),
        Value::Object(map) => map,
        other => {
            return Err(Unassessable::new(
                AssessmentErrorKind::UnexpectedShape,
                format!("expected tool list or object, found {}", json_type_name(other)),
            ));
        }
    };

    if map.is_empty() {
        return Ok(Vec::new());
    }

    if map.contains_key(TOOL_MARKER_KEY) {
        return Ok(vec![map]);
    }

    for alias in TOOL_LIST_ALIASES {
        match map.get(alias) {
            Some(Value::Array(items)) => return tool_objects(items, alias),
            Some(Value::Object(inner)) if inner.contains_key(TOOL_MARKER_KEY) => {
                return Ok(vec![inner]);
            }
            Some(Value::Object(inner)) if inner.is_empty() => return Ok(Vec::new()),
            _ => {}
        }
    }

    let mut lists = map.values().filter_map(Value::as_array);
    if let (Some(items), None) = (lists.next(), lists.next()) {
        return tool_objects(items, "single list field");
    }

    let keys = map.keys().map(String::as_str).collect::<Vec<&str>>().join(", ");
    Err(Unassessable::new(
        AssessmentErrorKind::UnexpectedShape,
        format!("no recognizable tool list among keys [{keys}]"),
    ))
}

fn tool_objects<'a>(items: &'a [Value], origin: &str) -> Result<Vec<&'a Map<String, Value>>, Unassessable> {
    items
        .iter()
        .map(|item| {
            item.as_object().ok_or_else(|| {
                Unassessable::new(
                    AssessmentErrorKind::UnexpectedShape,
                    format!(
                        "tool entry under {origin} is a {}, expected object",
                        json_type_name(item)
                    ),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bare_list_is_used_directly() {
        let value = json!([{"toolName": "a", "properlyCalled": "Yes"}, {"toolName": "b", "properlyCalled": "No"}]);
        let tools = normalize_tool_calls(&value).expect("list should normalize");
        assert_eq!(tools.len(), 2);
    }

    #[test]
    fn empty_object_means_no_tools() {
        let value = json!({});
        let tools = normalize_tool_calls(&value).expect("empty object is valid");
        assert!(tools.is_empty());
    }

    #[test]
    fn single_tool_object_is_wrapped() {
        let value = json!({"toolName": "refund", "properlyCalled": "No"});
        let tools = normalize_tool_calls(&value).expect("single tool should normalize");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["toolName"], "refund");
    }

    #[test]
    fn known_aliases_are_tried_in_order() {
        let value = json!({
            "summary": "two tools checked",
            "toolEvaluations": [{"properlyCalled": "Yes"}],
            "results": [{"properlyCalled": "No"}, {"properlyCalled": "No"}]
        });
        let tools = normalize_tool_calls(&value).expect("alias should normalize");
        assert_eq!(tools.len(), 1);
    }

    #[test]
    fn single_unknown_list_key_is_accepted() {
        let value = json!({"note": "ok", "resolverChecks": [{"properlyCalled": "No"}]});
        let tools = normalize_tool_calls(&value).expect("single list key should normalize");
        assert_eq!(tools.len(), 1);
    }

    #[test]
    fn ambiguous_or_malformed_shapes_are_unassessable() {
        let ambiguous = json!({"a": [{"properlyCalled": "No"}], "b": []});
        let err = normalize_tool_calls(&ambiguous).expect_err("two list keys are ambiguous");
        assert_eq!(err.reason, AssessmentErrorKind::UnexpectedShape);

        let strings = json!(["refund", "cancel"]);
        let err = normalize_tool_calls(&strings).expect_err("string entries are not tools");
        assert_eq!(err.reason, AssessmentErrorKind::UnexpectedShape);

        let err = normalize_tool_calls(&json!(42)).expect_err("number is not a tool list");
        assert_eq!(err.reason, AssessmentErrorKind::UnexpectedShape);
    }
}
