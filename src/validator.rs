use serde_json::Value;
use thiserror::Error;

const NULL_MARKERS: [&str; 2] = ["null", "None"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidResponse {
    #[error("response is empty or null")]
    EmptyResponse,
    #[error("response contains an error marker")]
    ErrorInResponse,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decides whether a stored judge response can be evaluated at all.
///
/// Runs before any parsing. `None` is the warehouse NULL.
pub fn validate_response(raw: Option<&str>) -> Result<&str, InvalidResponse> {
    let Some(raw) = raw else {
        return Err(InvalidResponse::EmptyResponse);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() || NULL_MARKERS.contains(&trimmed) {
        return Err(InvalidResponse::EmptyResponse);
    }

    if raw.to_ascii_lowercase().contains("error") {
        return Err(InvalidResponse::ErrorInResponse);
    }

    Ok(raw)
}

/// Removes a surrounding markdown code fence, with or without a `json` tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);

    rest.trim()
}

pub fn parse_response(raw: &str) -> Result<Value, ParseError> {
    let body = strip_code_fences(raw);
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_null_markers_are_empty_responses() {
        assert_eq!(validate_response(None), Err(InvalidResponse::EmptyResponse));
        assert_eq!(validate_response(Some("")), Err(InvalidResponse::EmptyResponse));
        assert_eq!(validate_response(Some("   \n")), Err(InvalidResponse::EmptyResponse));
        assert_eq!(validate_response(Some("null")), Err(InvalidResponse::EmptyResponse));
        assert_eq!(validate_response(Some(" None ")), Err(InvalidResponse::EmptyResponse));
    }

    #[test]
    fn error_marker_is_detected_case_insensitively() {
        assert_eq!(
            validate_response(Some("some ERROR occurred")),
            Err(InvalidResponse::ErrorInResponse)
        );
        assert_eq!(
            validate_response(Some(r#"{"Error": "timeout"}"#)),
            Err(InvalidResponse::ErrorInResponse)
        );
    }

    #[test]
    fn well_formed_json_is_valid() {
        assert_eq!(
            validate_response(Some(r#"{"NPS_score":1}"#)),
            Ok(r#"{"NPS_score":1}"#)
        );
    }

    #[test]
    fn strip_code_fences_handles_tagged_and_bare_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```JSON {\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn parse_response_reports_decode_failures() {
        let value = parse_response("```json\n{\"confusingPolicy\": \"Yes\"}\n```")
            .expect("fenced json should parse");
        assert_eq!(value["confusingPolicy"], "Yes");

        assert!(matches!(
            parse_response("{not json"),
            Err(ParseError::Json(_))
        ));
    }
}
