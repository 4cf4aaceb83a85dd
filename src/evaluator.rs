use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Map, json};
use tracing::debug;

use crate::config::CriterionBinding;
use crate::criteria::{ParsedCheck, Rule, Source, Unassessable, Verdict, evaluate_response};
use crate::model::{AssessmentErrorDetail, AssessmentErrorKind, FlaggingDetail};
use crate::warehouse::{Scope, Warehouse};

const EXCERPT_CHARS: usize = 200;

/// What one criterion binding found for a batch of conversations.
/// A conversation appears in at most one of the two maps.
#[derive(Debug, Default)]
pub struct EvaluatorOutput {
    pub flags: BTreeMap<String, FlaggingDetail>,
    pub errors: BTreeMap<String, AssessmentErrorDetail>,
}

struct RowVerdict {
    verdict: Verdict,
    excerpt: Option<String>,
}

pub fn run_evaluator(
    warehouse: &dyn Warehouse,
    binding: &CriterionBinding,
    scope: &Scope,
    ids: &[String],
) -> Result<EvaluatorOutput> {
    let rule = binding.criteria.rule();
    let mut output = EvaluatorOutput::default();

    let parsed_table = match rule.parsed_check {
        ParsedCheck::None => None,
        ParsedCheck::SourceTable => Some(binding.table.as_str()),
        ParsedCheck::RawTable => binding.raw_table.as_deref(),
    };
    if let Some(parsed_table) = parsed_table {
        for conversation_id in warehouse.fetch_unparsed(parsed_table, scope, ids)? {
            let failure = Unassessable::new(
                AssessmentErrorKind::NotParsed,
                format!("{parsed_table} marks the response IS_PARSED = FALSE"),
            );
            let detail = error_detail(binding, &rule, parsed_table, failure, None);
            output.errors.insert(conversation_id, detail);
        }
    }

    let remaining = ids
        .iter()
        .filter(|id| !output.errors.contains_key(*id))
        .cloned()
        .collect::<Vec<String>>();

    let mut per_conversation: BTreeMap<String, Vec<RowVerdict>> = BTreeMap::new();
    match rule.source {
        Source::Response(check) => {
            for row in warehouse.fetch_responses(&binding.table, scope, &remaining)? {
                let verdict = evaluate_response(check, row.llm_response.as_deref());
                let excerpt = row.llm_response.as_deref().map(excerpt_of);
                per_conversation
                    .entry(row.conversation_id)
                    .or_default()
                    .push(RowVerdict { verdict, excerpt });
            }
        }
        Source::RowExistence => {
            for row in warehouse.fetch_responses(&binding.table, scope, &remaining)? {
                per_conversation
                    .entry(row.conversation_id)
                    .or_default()
                    .push(RowVerdict {
                        verdict: Verdict::Flagged(Map::new()),
                        excerpt: None,
                    });
            }
        }
        Source::SummaryColumn => {
            let column = binding.criteria.as_str();
            let values = warehouse.fetch_summary_values(&binding.table, column, scope, &remaining)?;
            for (conversation_id, value) in values {
                per_conversation
                    .entry(conversation_id)
                    .or_default()
                    .push(RowVerdict {
                        verdict: summary_verdict(column, value),
                        excerpt: value.map(|number| number.to_string()),
                    });
            }
        }
    }

    for (conversation_id, rows) in per_conversation {
        let row_count = rows.len();
        match fold_rows(rows) {
            RowVerdict {
                verdict: Verdict::Flagged(mut fields),
                ..
            } => {
                fields.insert("row_count".to_string(), json!(row_count));
                output.flags.insert(
                    conversation_id,
                    FlaggingDetail {
                        criteria: binding.criteria.as_str().to_string(),
                        description: rule.description.to_string(),
                        table: binding.table.clone(),
                        fields,
                    },
                );
            }
            RowVerdict {
                verdict: Verdict::Unassessable(failure),
                excerpt,
            } => {
                debug!(
                    conversation_id = %conversation_id,
                    criteria = %binding.criteria,
                    reason = failure.reason.as_str(),
                    message = %failure.message,
                    "assessment error"
                );
                let detail = error_detail(binding, &rule, &binding.table, failure, excerpt);
                output.errors.insert(conversation_id, detail);
            }
            RowVerdict {
                verdict: Verdict::Clear,
                ..
            } => {}
        }
    }

    Ok(output)
}

fn summary_verdict(column: &str, value: Option<f64>) -> Verdict {
    match value {
        None => Verdict::Unassessable(Unassessable::new(
            AssessmentErrorKind::NonNumericValue,
            format!("summary column `{column}` is null or non-numeric"),
        )),
        Some(number) if number > 0.0 => {
            let mut fields = Map::new();
            fields.insert("column".to_string(), json!(column));
            fields.insert("value".to_string(), json!(number));
            Verdict::Flagged(fields)
        }
        Some(_) => Verdict::Clear,
    }
}

/// Any failing row makes the conversation unassessable; otherwise any flagged
/// row flags it.
fn fold_rows(rows: Vec<RowVerdict>) -> RowVerdict {
    let mut flagged = None;

    for row in rows {
        if matches!(row.verdict, Verdict::Unassessable(_)) {
            return row;
        }
        if flagged.is_none() && matches!(row.verdict, Verdict::Flagged(_)) {
            flagged = Some(row);
        }
    }

    flagged.unwrap_or(RowVerdict {
        verdict: Verdict::Clear,
        excerpt: None,
    })
}

fn error_detail(
    binding: &CriterionBinding,
    rule: &Rule,
    table: &str,
    failure: Unassessable,
    excerpt: Option<String>,
) -> AssessmentErrorDetail {
    AssessmentErrorDetail {
        criteria: binding.criteria.as_str().to_string(),
        description: rule.description.to_string(),
        table: table.to_string(),
        reason: failure.reason,
        message: failure.message,
        response_excerpt: excerpt,
    }
}

fn excerpt_of(raw: &str) -> String {
    raw.chars().take(EXCERPT_CHARS).collect()
}
