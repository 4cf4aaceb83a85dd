use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::aggregator::{Aggregation, aggregate};
use crate::config::DepartmentConfig;
use crate::model::{
    ConversationFlaggingRecord, ConversationOutcome, ConversationStatus, DepartmentReport,
    FlagSourceBreakdown, SummaryRow,
};
use crate::util::now_utc_string;
use crate::warehouse::{Scope, Warehouse};

const REPORT_VERSION: u32 = 1;

/// A finished report plus the records it was tallied from.
#[derive(Debug)]
pub struct DepartmentRun {
    pub report: DepartmentReport,
    pub aggregation: Aggregation,
}

pub fn build_report(
    warehouse: &dyn Warehouse,
    department: &DepartmentConfig,
    date: NaiveDate,
    config_sha256: &str,
) -> Result<DepartmentRun> {
    let conversation_ids = collect_conversation_ids(warehouse, department, date)?;
    info!(
        department = %department.name,
        date = %date,
        conversations = conversation_ids.len(),
        criteria = department.criteria.len(),
        "flagging conversations"
    );

    let aggregation = aggregate(warehouse, department, date, &conversation_ids);
    let report = tally_report(&department.name, date, config_sha256, &aggregation);

    info!(
        department = %department.name,
        date = %date,
        clean = report.clean_count,
        flagged = report.flagged_count,
        not_assessed = report.not_assessed_count,
        clean_percentage = report.clean_percentage,
        skipped_evaluators = report.skipped_evaluators.len(),
        "department report built"
    );

    Ok(DepartmentRun {
        report,
        aggregation,
    })
}

pub fn collect_conversation_ids(
    warehouse: &dyn Warehouse,
    department: &DepartmentConfig,
    date: NaiveDate,
) -> Result<BTreeSet<String>> {
    let scope = Scope::for_department(department, date);
    let mut ids = BTreeSet::new();

    for table in &department.conversation_source_tables {
        let found = warehouse.conversation_ids(table, &scope).with_context(|| {
            format!(
                "failed to list conversations for {} from {table}",
                department.name
            )
        })?;
        ids.extend(found);
    }

    Ok(ids)
}

pub fn tally_report(
    department: &str,
    date: NaiveDate,
    config_sha256: &str,
    aggregation: &Aggregation,
) -> DepartmentReport {
    let mut clean_count = 0;
    let mut flagged_count = 0;
    let mut not_assessed_count = 0;
    let mut flag_sources = FlagSourceBreakdown::default();
    let mut criteria_breakdown = BTreeMap::new();
    let mut assessment_error_breakdown = BTreeMap::new();
    let mut conversations = Vec::with_capacity(aggregation.records.len());

    for (conversation_id, record) in &aggregation.records {
        let status = record.status();
        match status {
            ConversationStatus::Clean => clean_count += 1,
            ConversationStatus::Flagged => flagged_count += 1,
            ConversationStatus::NotAssessed => not_assessed_count += 1,
        }

        if record.is_flagged {
            match (record.sa_nps_flagged, record.specialized_prompt_flagged) {
                (true, true) => flag_sources.both += 1,
                (true, false) => flag_sources.sa_nps_only += 1,
                (false, true) => flag_sources.specialized_prompt_only += 1,
                (false, false) => {}
            }
        }

        if status == ConversationStatus::Flagged {
            for name in record.flagging_details.keys() {
                *criteria_breakdown.entry(name.clone()).or_insert(0) += 1;
            }
        }
        for name in record.assessment_error_details.keys() {
            *assessment_error_breakdown.entry(name.clone()).or_insert(0) += 1;
        }

        conversations.push(ConversationOutcome {
            conversation_id: conversation_id.clone(),
            status,
            triggered_criteria: record.triggered_criteria.clone(),
            assessment_error_criteria: record.assessment_error_details.keys().cloned().collect(),
        });
    }

    DepartmentReport {
        report_version: REPORT_VERSION,
        generated_at: now_utc_string(),
        department: department.to_string(),
        date,
        config_sha256: config_sha256.to_string(),
        total_conversations: aggregation.records.len(),
        clean_count,
        flagged_count,
        not_assessed_count,
        clean_percentage: clean_percentage(clean_count, flagged_count),
        flag_sources,
        criteria_breakdown,
        assessment_error_breakdown,
        skipped_evaluators: aggregation.skipped_evaluators.clone(),
        conversations,
    }
}

/// NOT_ASSESSED conversations are excluded from the denominator.
pub fn clean_percentage(clean_count: usize, flagged_count: usize) -> f64 {
    let assessable = clean_count + flagged_count;
    if assessable == 0 {
        return 0.0;
    }
    clean_count as f64 / assessable as f64 * 100.0
}

pub fn summary_rows(
    department: &str,
    date: NaiveDate,
    records: &BTreeMap<String, ConversationFlaggingRecord>,
) -> Result<Vec<SummaryRow>> {
    records
        .iter()
        .map(|(conversation_id, record)| {
            let flagging_details = serde_json::to_string(&record.flagging_details)
                .with_context(|| format!("failed to serialize flags for {conversation_id}"))?;
            let assessment_errors = serde_json::to_string(&record.assessment_error_details)
                .with_context(|| format!("failed to serialize errors for {conversation_id}"))?;

            Ok(SummaryRow {
                conversation_id: conversation_id.clone(),
                department: department.to_string(),
                date,
                status: record.status(),
                is_flagged: record.is_flagged,
                triggered_criteria: record.triggered_criteria.join(","),
                flagging_details,
                assessment_errors,
                sa_nps_flagged: record.sa_nps_flagged,
                specialized_prompt_flagged: record.specialized_prompt_flagged,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::config::CriterionBinding;
    use crate::criteria::Criterion;
    use crate::model::{AssessmentErrorDetail, AssessmentErrorKind, CriterionFamily, FlaggingDetail};
    use crate::warehouse::fixtures::*;

    fn flag() -> FlaggingDetail {
        FlaggingDetail {
            criteria: "nps_score_1".to_string(),
            description: "NPS score of 1".to_string(),
            table: "SA_RAW_DATA".to_string(),
            fields: Map::new(),
        }
    }

    fn assessment_error() -> AssessmentErrorDetail {
        AssessmentErrorDetail {
            criteria: "clarification_count".to_string(),
            description: "clarification messages requested".to_string(),
            table: "CLARITY_SCORE_RAW_DATA".to_string(),
            reason: AssessmentErrorKind::NonNumericValue,
            message: "not numeric".to_string(),
            response_excerpt: None,
        }
    }

    fn aggregation_with(clean: usize, flagged: usize, not_assessed: usize) -> Aggregation {
        let mut records = BTreeMap::new();
        for n in 0..clean {
            records.insert(format!("clean-{n}"), ConversationFlaggingRecord::default());
        }
        for n in 0..flagged {
            let mut record = ConversationFlaggingRecord::default();
            record.add_flag("SA_prompt", CriterionFamily::SaNps, flag());
            records.insert(format!("flagged-{n}"), record);
        }
        for n in 0..not_assessed {
            let mut record = ConversationFlaggingRecord::default();
            record.add_assessment_error("clarity_score", assessment_error());
            records.insert(format!("na-{n}"), record);
        }
        Aggregation {
            records,
            skipped_evaluators: Vec::new(),
        }
    }

    #[test]
    fn clean_percentage_excludes_not_assessed() {
        let report = tally_report("Doctors", date(), "hash", &aggregation_with(3, 2, 5));

        assert_eq!(report.total_conversations, 10);
        assert_eq!(report.clean_count, 3);
        assert_eq!(report.flagged_count, 2);
        assert_eq!(report.not_assessed_count, 5);
        assert!((report.clean_percentage - 60.0).abs() < 1e-9);
    }

    #[test]
    fn clean_percentage_is_zero_without_assessable_conversations() {
        assert_eq!(clean_percentage(0, 0), 0.0);
        assert_eq!(clean_percentage(4, 0), 100.0);
    }

    #[test]
    fn statuses_partition_the_conversation_set() {
        let report = tally_report("Doctors", date(), "hash", &aggregation_with(4, 3, 2));

        assert_eq!(
            report.clean_count + report.flagged_count + report.not_assessed_count,
            report.total_conversations
        );
        let unique = report
            .conversations
            .iter()
            .map(|outcome| outcome.conversation_id.as_str())
            .collect::<BTreeSet<&str>>();
        assert_eq!(unique.len(), report.total_conversations);
    }

    #[test]
    fn flag_sources_and_breakdowns_are_tallied() {
        let mut aggregation = aggregation_with(0, 1, 0);
        let mut both = ConversationFlaggingRecord::default();
        both.add_flag("SA_prompt", CriterionFamily::SaNps, flag());
        both.add_flag("misprescription", CriterionFamily::SpecializedPrompt, flag());
        aggregation.records.insert("both".to_string(), both);

        let mut specialized_but_unassessed = ConversationFlaggingRecord::default();
        specialized_but_unassessed.add_flag("misprescription", CriterionFamily::SpecializedPrompt, flag());
        specialized_but_unassessed.add_assessment_error("clarity_score", assessment_error());
        aggregation.records.insert("mixed".to_string(), specialized_but_unassessed);

        let report = tally_report("Doctors", date(), "hash", &aggregation);

        assert_eq!(
            report.flag_sources,
            FlagSourceBreakdown {
                sa_nps_only: 1,
                specialized_prompt_only: 1,
                both: 1,
            }
        );
        assert_eq!(report.criteria_breakdown["SA_prompt"], 2);
        assert_eq!(report.criteria_breakdown["misprescription"], 1);
        assert_eq!(
            report.criteria_breakdown.values().sum::<usize>(),
            3,
            "only FLAGGED conversations feed the per-criterion counts"
        );
        assert_eq!(report.assessment_error_breakdown["clarity_score"], 1);
        assert_eq!(report.not_assessed_count, 1);
    }

    #[test]
    fn summary_rows_mirror_records() {
        let aggregation = aggregation_with(1, 1, 1);
        let rows = summary_rows("Doctors", date(), &aggregation.records).expect("rows should build");

        assert_eq!(rows.len(), 3);
        let flagged = rows
            .iter()
            .find(|row| row.status == ConversationStatus::Flagged)
            .expect("flagged row present");
        assert_eq!(flagged.triggered_criteria, "SA_prompt");
        assert!(flagged.flagging_details.contains("nps_score_1"));
        assert!(flagged.sa_nps_flagged);

        let not_assessed = rows
            .iter()
            .find(|row| row.status == ConversationStatus::NotAssessed)
            .expect("not-assessed row present");
        assert!(not_assessed.assessment_errors.contains("NON_NUMERIC_VALUE"));
    }

    #[test]
    fn build_report_is_deterministic_over_a_fixed_snapshot() {
        let warehouse = warehouse();
        insert_response(&warehouse, "SA_RAW_DATA", "c1", "Doctors", Some(r#"{"NPS_score": 1}"#));
        insert_response(&warehouse, "SA_RAW_DATA", "c2", "Doctors", Some(r#"{"NPS_score": 9}"#));
        insert_response(&warehouse, "SA_RAW_DATA", "c3", "Doctors", Some("Error: quota"));
        insert_response(&warehouse, "SA_RAW_DATA", "c4", "CC_Sales", Some(r#"{"NPS_score": 1}"#));
        insert_response(&warehouse, "CALL_REQUEST_RAW_DATA", "c2", "Doctors", Some("{}"));

        let department = DepartmentConfig {
            name: "Doctors".to_string(),
            match_prefix: false,
            conversation_source_tables: vec!["SA_RAW_DATA".to_string()],
            criteria: vec![
                CriterionBinding {
                    table: "SA_RAW_DATA".to_string(),
                    prompt_type: "SA_prompt".to_string(),
                    criteria: Criterion::NpsScore1,
                    raw_table: None,
                    family: None,
                },
                CriterionBinding {
                    table: "CALL_REQUEST_RAW_DATA".to_string(),
                    prompt_type: "call_request".to_string(),
                    criteria: Criterion::ExistsOnly,
                    raw_table: None,
                    family: None,
                },
            ],
        };

        let first = build_report(&warehouse, &department, date(), "hash").expect("first run");
        let second = build_report(&warehouse, &department, date(), "hash").expect("second run");

        assert_eq!(first.report.total_conversations, 3);
        assert_eq!(first.report.clean_count, 0);
        assert_eq!(first.report.flagged_count, 2);
        assert_eq!(first.report.not_assessed_count, 1);
        assert_eq!(first.report.flag_sources.sa_nps_only, 1);
        assert_eq!(first.report.flag_sources.specialized_prompt_only, 1);
        assert_eq!(first.report.conversations, second.report.conversations);
        assert_eq!(first.aggregation.records, second.aggregation.records);
    }

    #[test]
    fn missing_source_table_fails_the_report() {
        let warehouse = warehouse();
        let department = DepartmentConfig {
            name: "Doctors".to_string(),
            match_prefix: false,
            conversation_source_tables: vec!["NOT_THERE".to_string()],
            criteria: Vec::new(),
        };

        assert!(build_report(&warehouse, &department, date(), "hash").is_err());
    }
}
