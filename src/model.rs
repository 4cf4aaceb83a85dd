use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validator::InvalidResponse;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionFamily {
    SaNps,
    SpecializedPrompt,
}

impl CriterionFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SaNps => "sa_nps",
            Self::SpecializedPrompt => "specialized_prompt",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentErrorKind {
    EmptyResponse,
    ErrorInResponse,
    JsonDecodeError,
    UnexpectedListFormat,
    UnexpectedShape,
    MissingField,
    NonNumericValue,
    NotParsed,
}

impl AssessmentErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyResponse => "EMPTY_RESPONSE",
            Self::ErrorInResponse => "ERROR_IN_RESPONSE",
            Self::JsonDecodeError => "JSON_DECODE_ERROR",
            Self::UnexpectedListFormat => "UNEXPECTED_LIST_FORMAT",
            Self::UnexpectedShape => "UNEXPECTED_SHAPE",
            Self::MissingField => "MISSING_FIELD",
            Self::NonNumericValue => "NON_NUMERIC_VALUE",
            Self::NotParsed => "NOT_PARSED",
        }
    }
}

impl From<InvalidResponse> for AssessmentErrorKind {
    fn from(value: InvalidResponse) -> Self {
        match value {
            InvalidResponse::EmptyResponse => Self::EmptyResponse,
            InvalidResponse::ErrorInResponse => Self::ErrorInResponse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggingDetail {
    pub criteria: String,
    pub description: String,
    pub table: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentErrorDetail {
    pub criteria: String,
    pub description: String,
    pub table: String,
    pub reason: AssessmentErrorKind,
    pub message: String,
    pub response_excerpt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationFlaggingRecord {
    pub is_flagged: bool,
    pub triggered_criteria: Vec<String>,
    pub flagging_details: BTreeMap<String, FlaggingDetail>,
    pub assessment_error_details: BTreeMap<String, AssessmentErrorDetail>,
    pub sa_nps_flagged: bool,
    pub specialized_prompt_flagged: bool,
}

impl ConversationFlaggingRecord {
    pub fn add_flag(&mut self, name: &str, family: CriterionFamily, detail: FlaggingDetail) {
        self.is_flagged = true;
        match family {
            CriterionFamily::SaNps => self.sa_nps_flagged = true,
            CriterionFamily::SpecializedPrompt => self.specialized_prompt_flagged = true,
        }
        if !self.triggered_criteria.iter().any(|existing| existing == name) {
            self.triggered_criteria.push(name.to_string());
        }
        self.flagging_details.insert(name.to_string(), detail);
    }

    pub fn add_assessment_error(&mut self, name: &str, detail: AssessmentErrorDetail) {
        self.assessment_error_details.insert(name.to_string(), detail);
    }

    pub fn status(&self) -> ConversationStatus {
        resolve_status(self)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Clean,
    Flagged,
    NotAssessed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "CLEAN",
            Self::Flagged => "FLAGGED",
            Self::NotAssessed => "NOT_ASSESSED",
        }
    }
}

/// NOT_ASSESSED wins over FLAGGED: an unreliable measurement voids the clean
/// guarantee whatever the other criteria found.
pub fn resolve_status(record: &ConversationFlaggingRecord) -> ConversationStatus {
    if !record.assessment_error_details.is_empty() {
        ConversationStatus::NotAssessed
    } else if record.is_flagged {
        ConversationStatus::Flagged
    } else {
        ConversationStatus::Clean
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagSourceBreakdown {
    pub sa_nps_only: usize,
    pub specialized_prompt_only: usize,
    pub both: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationOutcome {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub triggered_criteria: Vec<String>,
    pub assessment_error_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentReport {
    pub report_version: u32,
    pub generated_at: String,
    pub department: String,
    pub date: NaiveDate,
    pub config_sha256: String,
    pub total_conversations: usize,
    pub clean_count: usize,
    pub flagged_count: usize,
    pub not_assessed_count: usize,
    pub clean_percentage: f64,
    pub flag_sources: FlagSourceBreakdown,
    pub criteria_breakdown: BTreeMap<String, usize>,
    pub assessment_error_breakdown: BTreeMap<String, usize>,
    pub skipped_evaluators: Vec<String>,
    pub conversations: Vec<ConversationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub conversation_id: String,
    pub department: String,
    pub date: NaiveDate,
    pub status: ConversationStatus,
    pub is_flagged: bool,
    pub triggered_criteria: String,
    pub flagging_details: String,
    pub assessment_errors: String,
    pub sa_nps_flagged: bool,
    pub specialized_prompt_flagged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(criteria: &str) -> FlaggingDetail {
        FlaggingDetail {
            criteria: criteria.to_string(),
            description: "test flag".to_string(),
            table: "T".to_string(),
            fields: Map::new(),
        }
    }

    fn assessment_error(criteria: &str) -> AssessmentErrorDetail {
        AssessmentErrorDetail {
            criteria: criteria.to_string(),
            description: "test error".to_string(),
            table: "T".to_string(),
            reason: AssessmentErrorKind::JsonDecodeError,
            message: "bad json".to_string(),
            response_excerpt: None,
        }
    }

    #[test]
    fn empty_record_is_clean() {
        assert_eq!(
            ConversationFlaggingRecord::default().status(),
            ConversationStatus::Clean
        );
    }

    #[test]
    fn flag_without_errors_is_flagged() {
        let mut record = ConversationFlaggingRecord::default();
        record.add_flag("nps", CriterionFamily::SaNps, flag("nps_score_1"));

        assert_eq!(record.status(), ConversationStatus::Flagged);
        assert!(record.sa_nps_flagged);
        assert!(!record.specialized_prompt_flagged);
        assert_eq!(record.triggered_criteria, vec!["nps".to_string()]);
    }

    #[test]
    fn assessment_error_takes_precedence_over_flag() {
        let mut record = ConversationFlaggingRecord::default();
        record.add_flag("nps", CriterionFamily::SaNps, flag("nps_score_1"));
        record.add_assessment_error("clarity", assessment_error("clarification_count"));

        assert!(record.is_flagged);
        assert_eq!(record.status(), ConversationStatus::NotAssessed);
    }

    #[test]
    fn assessment_error_alone_does_not_set_flagged() {
        let mut record = ConversationFlaggingRecord::default();
        record.add_assessment_error("clarity", assessment_error("clarification_count"));

        assert!(!record.is_flagged);
        assert_eq!(resolve_status(&record), ConversationStatus::NotAssessed);
    }

    #[test]
    fn repeated_flag_names_are_recorded_once() {
        let mut record = ConversationFlaggingRecord::default();
        record.add_flag("tools", CriterionFamily::SpecializedPrompt, flag("a"));
        record.add_flag("tools", CriterionFamily::SpecializedPrompt, flag("a"));

        assert_eq!(record.triggered_criteria.len(), 1);
        assert!(record.specialized_prompt_flagged);
    }

    #[test]
    fn error_kinds_serialize_as_screaming_snake_case() {
        let encoded = serde_json::to_string(&AssessmentErrorKind::UnexpectedListFormat)
            .expect("kind should serialize");
        assert_eq!(encoded, "\"UNEXPECTED_LIST_FORMAT\"");
        assert_eq!(
            AssessmentErrorKind::UnexpectedListFormat.as_str(),
            "UNEXPECTED_LIST_FORMAT"
        );
    }
}
