use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::DepartmentConfig;
use crate::evaluator::run_evaluator;
use crate::model::ConversationFlaggingRecord;
use crate::warehouse::{Scope, Warehouse};

#[derive(Debug, Default)]
pub struct Aggregation {
    pub records: BTreeMap<String, ConversationFlaggingRecord>,
    /// Criterion names whose evaluator failed and contributed nothing this run.
    pub skipped_evaluators: Vec<String>,
}

/// Runs every configured criterion for the department over one batch of
/// conversations and merges the results into one record per conversation.
///
/// A failing evaluator is logged and skipped; the rest of the batch still runs.
pub fn aggregate(
    warehouse: &dyn Warehouse,
    department: &DepartmentConfig,
    date: NaiveDate,
    conversation_ids: &BTreeSet<String>,
) -> Aggregation {
    let mut aggregation = Aggregation {
        records: conversation_ids
            .iter()
            .map(|id| (id.clone(), ConversationFlaggingRecord::default()))
            .collect(),
        skipped_evaluators: Vec::new(),
    };

    if conversation_ids.is_empty() {
        return aggregation;
    }

    let ids = conversation_ids.iter().cloned().collect::<Vec<String>>();
    let scope = Scope::for_department(department, date);

    for binding in &department.criteria {
        let output = match run_evaluator(warehouse, binding, &scope, &ids) {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    department = %department.name,
                    prompt_type = %binding.prompt_type,
                    criteria = %binding.criteria,
                    table = %binding.table,
                    error = %format!("{err:#}"),
                    "evaluator failed; skipping"
                );
                aggregation.skipped_evaluators.push(binding.name().to_string());
                continue;
            }
        };

        info!(
            department = %department.name,
            prompt_type = %binding.prompt_type,
            criteria = %binding.criteria,
            flagged = output.flags.len(),
            assessment_errors = output.errors.len(),
            "evaluator complete"
        );

        let family = binding.family();
        for (conversation_id, detail) in output.flags {
            if let Some(record) = aggregation.records.get_mut(&conversation_id) {
                record.add_flag(binding.name(), family, detail);
            }
        }
        for (conversation_id, detail) in output.errors {
            if let Some(record) = aggregation.records.get_mut(&conversation_id) {
                record.add_assessment_error(binding.name(), detail);
            }
        }
    }

    aggregation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CriterionBinding;
    use crate::criteria::Criterion;
    use crate::model::ConversationStatus;
    use crate::warehouse::fixtures::*;

    fn binding(table: &str, prompt_type: &str, criteria: Criterion) -> CriterionBinding {
        CriterionBinding {
            table: table.to_string(),
            prompt_type: prompt_type.to_string(),
            criteria,
            raw_table: None,
            family: None,
        }
    }

    fn department(criteria: Vec<CriterionBinding>) -> DepartmentConfig {
        DepartmentConfig {
            name: "Doctors".to_string(),
            match_prefix: false,
            conversation_source_tables: vec!["SA_RAW_DATA".to_string()],
            criteria,
        }
    }

    fn id_set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn every_input_id_gets_a_record() {
        let warehouse = warehouse();
        insert_response(&warehouse, "SA_RAW_DATA", "c1", "Doctors", Some(r#"{"NPS_score": 5}"#));

        let config = department(vec![binding("SA_RAW_DATA", "SA_prompt", Criterion::NpsScore1)]);
        let aggregation = aggregate(&warehouse, &config, date(), &id_set(&["c1", "c2", "c3"]));

        assert_eq!(aggregation.records.len(), 3);
        assert!(aggregation.records.values().all(|record| record.status() == ConversationStatus::Clean));
    }

    #[test]
    fn flags_set_family_bits_and_errors_take_precedence() {
        let warehouse = warehouse();
        insert_response(&warehouse, "SA_RAW_DATA", "c1", "Doctors", Some(r#"{"NPS_score": 1}"#));
        insert_response(&warehouse, "SA_RAW_DATA", "c2", "Doctors", Some(r#"{"NPS_score": 1}"#));
        insert_response(&warehouse, "CLARITY_SCORE_RAW_DATA", "c2", "Doctors", Some(r#"{"ClarificationMessagesTotal": "two"}"#));
        insert_response(&warehouse, "MISPRESCRIPTION_RAW_DATA", "c3", "Doctors", Some("YES"));

        let config = department(vec![
            binding("SA_RAW_DATA", "SA_prompt", Criterion::NpsScore1),
            binding("CLARITY_SCORE_RAW_DATA", "clarity_score", Criterion::ClarificationCount),
            binding("MISPRESCRIPTION_RAW_DATA", "misprescription", Criterion::ContainsYes),
        ]);
        let aggregation = aggregate(&warehouse, &config, date(), &id_set(&["c1", "c2", "c3", "c4"]));
        let records = &aggregation.records;

        assert_eq!(records["c1"].status(), ConversationStatus::Flagged);
        assert!(records["c1"].sa_nps_flagged);
        assert!(!records["c1"].specialized_prompt_flagged);

        assert!(records["c2"].is_flagged);
        assert!(records["c2"].assessment_error_details.contains_key("clarity_score"));
        assert_eq!(records["c2"].status(), ConversationStatus::NotAssessed);

        assert_eq!(records["c3"].triggered_criteria, vec!["misprescription".to_string()]);
        assert!(records["c3"].specialized_prompt_flagged);

        assert_eq!(records["c4"].status(), ConversationStatus::Clean);
    }

    #[test]
    fn failing_evaluator_is_skipped_without_aborting_the_batch() {
        let warehouse = warehouse();
        insert_response(&warehouse, "SA_RAW_DATA", "c1", "Doctors", Some(r#"{"NPS_score": 1}"#));

        let config = department(vec![
            binding("MISSING_TABLE", "broken", Criterion::ContainsYes),
            binding("SA_RAW_DATA", "SA_prompt", Criterion::NpsScore1),
        ]);
        let aggregation = aggregate(&warehouse, &config, date(), &id_set(&["c1"]));

        assert_eq!(aggregation.skipped_evaluators, vec!["broken".to_string()]);
        assert_eq!(aggregation.records["c1"].status(), ConversationStatus::Flagged);
    }

    #[test]
    fn empty_id_set_issues_no_queries() {
        let warehouse = warehouse();
        let config = department(vec![binding("MISSING_TABLE", "broken", Criterion::ContainsYes)]);

        let aggregation = aggregate(&warehouse, &config, date(), &BTreeSet::new());

        assert!(aggregation.records.is_empty());
        assert!(aggregation.skipped_evaluators.is_empty());
    }
}
