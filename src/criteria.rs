use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::model::{AssessmentErrorKind, CriterionFamily};
use crate::validator::{InvalidResponse, parse_response, validate_response};

mod fields;
mod normalize;

use self::fields::*;
use self::normalize::normalize_tool_calls;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    #[serde(rename = "nps_score_1")]
    NpsScore1,
    ContainsYes,
    ContainsTrue,
    ContainsRogueAnswer,
    ExistsOnly,
    ClarificationCount,
    ConfusingPolicyYes,
    MissingPolicyYes,
    CcSalesUnclearPolicyTrue,
    CcSalesMissingPolicyTrue,
    AvoidVisit,
    WrongAnswerViolation,
    UnclearPolicyViolation,
    MissingPolicyViolation,
    WrongToolIssueType,
    MissedToolIssueType,
    UnclearPolicyIssueType,
    MissingPolicyIssueType,
    CcResolversProperlyCalledNo,
    CcResolversMissedCallYes,
    SalesWrongAnswerTrue,
    GulfMaidsMissingTool,
    GulfMaidsWrongTool,
    NotProperlyCalledCount,
    MissedCalledCount,
    WrongToolPercentage,
    MissingToolPercentage,
    WrongToolPct,
    MissingToolPct,
}

/// Where an evaluator reads its evidence from.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Source {
    Response(Check),
    RowExistence,
    /// Pre-aggregated numeric column named after the criteria tag.
    SummaryColumn,
}

/// Which table, if any, is scanned for `IS_PARSED = 'FALSE'` before the main pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParsedCheck {
    None,
    SourceTable,
    RawTable,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Check {
    ContainsText(&'static str),
    NumberEquals {
        field: &'static str,
        target: f64,
    },
    PositiveCount {
        fields: &'static [&'static str],
    },
    TextEquals {
        field: &'static str,
        target: &'static str,
    },
    Truthy {
        field: &'static str,
        count_field: Option<&'static str>,
    },
    ViolationType {
        label: &'static str,
    },
    IssueType {
        section: &'static str,
        target: &'static str,
    },
    ProperlyCalledNo,
    MissedCallYes,
    MissingTools,
    WrongToolCalls,
}

#[derive(Copy, Clone, Debug)]
pub struct Rule {
    pub source: Source,
    pub parsed_check: ParsedCheck,
    pub description: &'static str,
}

const ANALYSIS_REPORT: &str = "ANALYSIS_REPORT";
const TOOL_COMPLIANCE_ANALYSIS: &str = "TOOL_COMPLIANCE_ANALYSIS";
const POLICY_COMPLIANCE_ISSUES: &str = "POLICY_COMPLIANCE_ISSUES";
const TOOL_NAME_KEYS: [&str; 4] = ["toolName", "tool_name", "Tool Name", "name"];

impl Criterion {
    pub const ALL: [Criterion; 29] = [
        Self::NpsScore1,
        Self::ContainsYes,
        Self::ContainsTrue,
        Self::ContainsRogueAnswer,
        Self::ExistsOnly,
        Self::ClarificationCount,
        Self::ConfusingPolicyYes,
        Self::MissingPolicyYes,
        Self::CcSalesUnclearPolicyTrue,
        Self::CcSalesMissingPolicyTrue,
        Self::AvoidVisit,
        Self::WrongAnswerViolation,
        Self::UnclearPolicyViolation,
        Self::MissingPolicyViolation,
        Self::WrongToolIssueType,
        Self::MissedToolIssueType,
        Self::UnclearPolicyIssueType,
        Self::MissingPolicyIssueType,
        Self::CcResolversProperlyCalledNo,
        Self::CcResolversMissedCallYes,
        Self::SalesWrongAnswerTrue,
        Self::GulfMaidsMissingTool,
        Self::GulfMaidsWrongTool,
        Self::NotProperlyCalledCount,
        Self::MissedCalledCount,
        Self::WrongToolPercentage,
        Self::MissingToolPercentage,
        Self::WrongToolPct,
        Self::MissingToolPct,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NpsScore1 => "nps_score_1",
            Self::ContainsYes => "contains_yes",
            Self::ContainsTrue => "contains_true",
            Self::ContainsRogueAnswer => "contains_rogue_answer",
            Self::ExistsOnly => "exists_only",
            Self::ClarificationCount => "clarification_count",
            Self::ConfusingPolicyYes => "confusing_policy_yes",
            Self::MissingPolicyYes => "missing_policy_yes",
            Self::CcSalesUnclearPolicyTrue => "cc_sales_unclear_policy_true",
            Self::CcSalesMissingPolicyTrue => "cc_sales_missing_policy_true",
            Self::AvoidVisit => "avoid_visit",
            Self::WrongAnswerViolation => "wrong_answer_violation",
            Self::UnclearPolicyViolation => "unclear_policy_violation",
            Self::MissingPolicyViolation => "missing_policy_violation",
            Self::WrongToolIssueType => "wrong_tool_issue_type",
            Self::MissedToolIssueType => "missed_tool_issue_type",
            Self::UnclearPolicyIssueType => "unclear_policy_issue_type",
            Self::MissingPolicyIssueType => "missing_policy_issue_type",
            Self::CcResolversProperlyCalledNo => "cc_resolvers_properly_called_no",
            Self::CcResolversMissedCallYes => "cc_resolvers_missed_call_yes",
            Self::SalesWrongAnswerTrue => "sales_wrong_answer_true",
            Self::GulfMaidsMissingTool => "gulf_maids_missing_tool",
            Self::GulfMaidsWrongTool => "gulf_maids_wrong_tool",
            Self::NotProperlyCalledCount => "not_properly_called_count",
            Self::MissedCalledCount => "missed_called_count",
            Self::WrongToolPercentage => "wrong_tool_percentage",
            Self::MissingToolPercentage => "missing_tool_percentage",
            Self::WrongToolPct => "wrong_tool_pct",
            Self::MissingToolPct => "missing_tool_pct",
        }
    }

    pub fn default_family(self) -> CriterionFamily {
        match self {
            Self::NpsScore1 => CriterionFamily::SaNps,
            _ => CriterionFamily::SpecializedPrompt,
        }
    }

    pub fn rule(self) -> Rule {
        use Check::*;

        let (source, parsed_check, description) = match self {
            Self::NpsScore1 => (
                Source::Response(NumberEquals { field: "NPS_score", target: 1.0 }),
                ParsedCheck::None,
                "NPS score of 1",
            ),
            Self::ContainsYes => (
                Source::Response(ContainsText("YES")),
                ParsedCheck::None,
                "response contains YES",
            ),
            Self::ContainsTrue => (
                Source::Response(ContainsText("TRUE")),
                ParsedCheck::None,
                "response contains TRUE",
            ),
            Self::ContainsRogueAnswer => (
                Source::Response(ContainsText("ROGUEANSWER")),
                ParsedCheck::None,
                "response contains RogueAnswer",
            ),
            Self::ExistsOnly => (Source::RowExistence, ParsedCheck::None, "conversation present in table"),
            Self::ClarificationCount => (
                Source::Response(PositiveCount {
                    fields: &["ClarificationMessagesTotal", "ClarificationMessages"],
                }),
                ParsedCheck::None,
                "clarification messages requested",
            ),
            Self::ConfusingPolicyYes => (
                Source::Response(TextEquals { field: "confusingPolicy", target: "YES" }),
                ParsedCheck::None,
                "confusing policy reported",
            ),
            Self::MissingPolicyYes => (
                Source::Response(TextEquals { field: "missingPolicy", target: "YES" }),
                ParsedCheck::None,
                "missing policy reported",
            ),
            Self::CcSalesUnclearPolicyTrue => (
                Source::Response(Truthy { field: "unclear_policy", count_field: None }),
                ParsedCheck::SourceTable,
                "unclear policy reported",
            ),
            Self::CcSalesMissingPolicyTrue => (
                Source::Response(Truthy { field: "missing_policy", count_field: None }),
                ParsedCheck::SourceTable,
                "missing policy reported",
            ),
            Self::AvoidVisit => (
                Source::Response(Truthy { field: "could_avoid_visit", count_field: None }),
                ParsedCheck::None,
                "visit could have been avoided",
            ),
            Self::WrongAnswerViolation => (
                Source::Response(ViolationType { label: "Wrong Answer" }),
                ParsedCheck::None,
                "wrong answer violation",
            ),
            Self::UnclearPolicyViolation => (
                Source::Response(ViolationType { label: "Unclear Policy" }),
                ParsedCheck::None,
                "unclear policy violation",
            ),
            Self::MissingPolicyViolation => (
                Source::Response(ViolationType { label: "Missing Policy" }),
                ParsedCheck::None,
                "missing policy violation",
            ),
            Self::WrongToolIssueType => (
                Source::Response(IssueType { section: TOOL_COMPLIANCE_ANALYSIS, target: "WRONG_TOOL" }),
                ParsedCheck::None,
                "wrong tool issue",
            ),
            Self::MissedToolIssueType => (
                Source::Response(IssueType { section: TOOL_COMPLIANCE_ANALYSIS, target: "MISSED_TOOL" }),
                ParsedCheck::None,
                "missed tool issue",
            ),
            Self::UnclearPolicyIssueType => (
                Source::Response(IssueType { section: POLICY_COMPLIANCE_ISSUES, target: "UNCLEAR_POLICY" }),
                ParsedCheck::None,
                "unclear policy issue",
            ),
            Self::MissingPolicyIssueType => (
                Source::Response(IssueType { section: POLICY_COMPLIANCE_ISSUES, target: "MISSING_POLICY" }),
                ParsedCheck::None,
                "missing policy issue",
            ),
            Self::CcResolversProperlyCalledNo => (
                Source::Response(ProperlyCalledNo),
                ParsedCheck::None,
                "tool not properly called",
            ),
            Self::CcResolversMissedCallYes => (
                Source::Response(MissedCallYes),
                ParsedCheck::None,
                "tool call missed",
            ),
            Self::SalesWrongAnswerTrue => (
                Source::Response(Truthy { field: "wrong_answer", count_field: Some("wrong_answer_count") }),
                ParsedCheck::None,
                "wrong answer given",
            ),
            Self::GulfMaidsMissingTool => (Source::Response(MissingTools), ParsedCheck::None, "missing tool call"),
            Self::GulfMaidsWrongTool => (Source::Response(WrongToolCalls), ParsedCheck::None, "wrong tool call"),
            Self::NotProperlyCalledCount => (
                Source::SummaryColumn,
                ParsedCheck::RawTable,
                "tools not properly called",
            ),
            Self::MissedCalledCount => (Source::SummaryColumn, ParsedCheck::RawTable, "tool calls missed"),
            Self::WrongToolPercentage | Self::WrongToolPct => (
                Source::SummaryColumn,
                ParsedCheck::RawTable,
                "wrong tool percentage above zero",
            ),
            Self::MissingToolPercentage | Self::MissingToolPct => (
                Source::SummaryColumn,
                ParsedCheck::RawTable,
                "missing tool percentage above zero",
            ),
        };

        Rule {
            source,
            parsed_check,
            description,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criterion {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        match Self::ALL.into_iter().find(|criterion| criterion.as_str() == trimmed) {
            Some(criterion) => Ok(criterion),
            None => bail!("unknown criteria tag: {trimmed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unassessable {
    pub reason: AssessmentErrorKind,
    pub message: String,
}

impl Unassessable {
    pub fn new(reason: AssessmentErrorKind, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<InvalidResponse> for Unassessable {
    fn from(value: InvalidResponse) -> Self {
        Self::new(value.into(), value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Flagged(Map<String, Value>),
    Clear,
    Unassessable(Unassessable),
}

impl Verdict {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Flagged(fields) => json!({"verdict": "flagged", "evidence": fields}),
            Self::Clear => json!({"verdict": "clear"}),
            Self::Unassessable(failure) => json!({
                "verdict": "assessment_error",
                "reason": failure.reason,
                "message": failure.message,
            }),
        }
    }
}

/// Validates, parses and applies one response-level check.
pub fn evaluate_response(check: Check, raw: Option<&str>) -> Verdict {
    match run_check(check, raw) {
        Ok(Some(fields)) => Verdict::Flagged(fields),
        Ok(None) => Verdict::Clear,
        Err(failure) => Verdict::Unassessable(failure),
    }
}

type Evidence = Option<Map<String, Value>>;

fn run_check(check: Check, raw: Option<&str>) -> Result<Evidence, Unassessable> {
    let raw = validate_response(raw)?;

    if let Check::ContainsText(needle) = check {
        let found = raw.to_ascii_uppercase().contains(needle);
        return Ok(found.then(|| evidence([("matched_text", json!(needle))])));
    }

    let value = parse_response(raw)
        .map_err(|err| Unassessable::new(AssessmentErrorKind::JsonDecodeError, err.to_string()))?;

    match check {
        Check::ContainsText(_) => Ok(None),
        Check::NumberEquals { field, target } => {
            let map = require_object(&value)?;
            let score = require_number(require_field(map, field)?, field)?;
            Ok((score == target).then(|| evidence([("field", json!(field)), ("value", json!(score))])))
        }
        Check::PositiveCount { fields } => check_positive_count(&value, fields),
        Check::TextEquals { field, target } => {
            let map = require_object(&value)?;
            let found = require_field(map, field)?;
            Ok(text_equals_ignore_case(found, target)
                .then(|| evidence([("field", json!(field)), ("value", found.clone())])))
        }
        Check::Truthy { field, count_field } => {
            let map = require_object(&value)?;
            let found = require_field(map, field)?;
            if !is_truthy(found) {
                return Ok(None);
            }
            let mut fields = evidence([("field", json!(field)), ("value", found.clone())]);
            if let Some(key) = count_field {
                if let Some(count) = map.get(key).and_then(as_integer) {
                    fields.insert(key.to_string(), json!(count));
                }
            }
            Ok(Some(fields))
        }
        Check::ViolationType { label } => check_violations(&value, label),
        Check::IssueType { section, target } => check_issue_type(&value, section, target),
        Check::ProperlyCalledNo => check_properly_called(&value),
        Check::MissedCallYes => check_missed_calls(&value),
        Check::MissingTools => check_missing_tools(&value),
        Check::WrongToolCalls => check_wrong_tool_calls(&value),
    }
}

fn evidence<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn check_positive_count(value: &Value, keys: &[&str]) -> Result<Evidence, Unassessable> {
    let map = require_object(value)?;
    let Some((key, found)) = keys
        .iter()
        .find_map(|key| map.get(*key).filter(|value| !value.is_null()).map(|value| (*key, value)))
    else {
        return Err(Unassessable::new(
            AssessmentErrorKind::MissingField,
            format!("missing all of {}", keys.join(", ")),
        ));
    };

    let count = require_integer(found, key)?;
    Ok((count > 0).then(|| evidence([("field", json!(key)), ("count", json!(count))])))
}

fn check_violations(value: &Value, label: &str) -> Result<Evidence, Unassessable> {
    let map = require_object(value)?;
    let violations = require_array(require_field(map, "violations")?, "violations")?;

    let matched = violations
        .iter()
        .filter(|violation| {
            violation
                .get("violation_type")
                .map(|kind| text_equals_ignore_case(kind, label))
                .unwrap_or(false)
        })
        .cloned()
        .collect::<Vec<Value>>();

    if matched.is_empty() {
        return Ok(None);
    }

    Ok(Some(evidence([
        ("violation_type", json!(label)),
        ("matched_count", json!(matched.len())),
        ("violations", Value::Array(matched)),
    ])))
}

fn check_issue_type(value: &Value, section: &str, target: &str) -> Result<Evidence, Unassessable> {
    let map = require_object(value)?;
    let report = require_object(require_field(map, ANALYSIS_REPORT)?)?;

    let issues = match report.get(section) {
        None | Some(Value::Null) => return Ok(None),
        Some(found) => require_array(found, section)?,
    };

    let matched = issues
        .iter()
        .filter(|issue| text_equals(issue.get("ISSUE_TYPE"), target))
        .cloned()
        .collect::<Vec<Value>>();

    if matched.is_empty() {
        return Ok(None);
    }

    Ok(Some(evidence([
        ("issue_type", json!(target)),
        ("matched_count", json!(matched.len())),
        ("issues", Value::Array(matched)),
    ])))
}

fn check_properly_called(value: &Value) -> Result<Evidence, Unassessable> {
    let tools = normalize_tool_calls(value)?;

    let offending = tools
        .iter()
        .filter(|tool| text_equals(tool.get("properlyCalled"), "No"))
        .map(|tool| json!(first_text(tool, &TOOL_NAME_KEYS).unwrap_or("unknown")))
        .collect::<Vec<Value>>();

    if offending.is_empty() {
        return Ok(None);
    }

    Ok(Some(evidence([
        ("not_properly_called_count", json!(offending.len())),
        ("tools_checked", json!(tools.len())),
        ("tools", Value::Array(offending)),
    ])))
}

fn check_missed_calls(value: &Value) -> Result<Evidence, Unassessable> {
    let map = require_object(value)?;

    let missed = map
        .iter()
        .filter(|(_, tool)| text_equals(tool.get("missedCall"), "Yes"))
        .map(|(key, _)| json!(key))
        .collect::<Vec<Value>>();

    if missed.is_empty() {
        return Ok(None);
    }

    Ok(Some(evidence([
        ("missed_call_count", json!(missed.len())),
        ("tools", Value::Array(missed)),
    ])))
}

fn check_missing_tools(value: &Value) -> Result<Evidence, Unassessable> {
    let map = require_object(value)?;
    let entries = require_array(require_field(map, "Missing Tools")?, "Missing Tools")?;

    let mut missing = Vec::new();
    for entry in entries {
        let name = match entry {
            Value::String(name) => name.as_str(),
            Value::Object(tool) => tool.get("Tool Name").and_then(Value::as_str).unwrap_or(""),
            other => {
                return Err(Unassessable::new(
                    AssessmentErrorKind::UnexpectedShape,
                    format!("missing tool entry is a {}", json_type_name(other)),
                ));
            }
        };
        let name = name.trim();
        if !name.is_empty() && !name.eq_ignore_ascii_case("none") {
            missing.push(json!(name));
        }
    }

    if missing.is_empty() {
        return Ok(None);
    }

    Ok(Some(evidence([("missing_tools", Value::Array(missing))])))
}

fn check_wrong_tool_calls(value: &Value) -> Result<Evidence, Unassessable> {
    let map = require_object(value)?;
    let summary = require_field(map, "Tool Calls Summary")?;

    let tools: Vec<(String, &Value)> = match summary {
        Value::Object(by_name) => by_name.iter().map(|(name, tool)| (name.clone(), tool)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, tool)| {
                let name = tool
                    .get("Tool Name")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| format!("tool #{}", index + 1));
                (name, tool)
            })
            .collect(),
        other => {
            return Err(Unassessable::new(
                AssessmentErrorKind::UnexpectedShape,
                format!("`Tool Calls Summary` is a {}", json_type_name(other)),
            ));
        }
    };

    let mut wrong = Vec::new();
    for (name, tool) in tools {
        let Some(calls) = tool.get("Wrong Calls").filter(|calls| !calls.is_null()) else {
            continue;
        };
        let calls = require_number(calls, "Wrong Calls")?;
        if calls > 0.0 {
            wrong.push(json!({"tool": name, "wrong_calls": calls}));
        }
    }

    if wrong.is_empty() {
        return Ok(None);
    }

    Ok(Some(evidence([("wrong_tools", Value::Array(wrong))])))
}
