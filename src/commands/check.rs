use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use crate::cli::CheckArgs;
use crate::criteria::{Source, evaluate_response};
use crate::model::AssessmentErrorKind;
use crate::validator::validate_response;

pub fn run(args: CheckArgs) -> Result<()> {
    let raw = match (&args.response, &args.response_path) {
        (Some(response), _) => response.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read response file {}", path.display()))?,
        (None, None) => String::new(),
    };

    let rule = args.criteria.rule();
    let validation = match validate_response(Some(&raw)) {
        Ok(_) => json!({"is_valid": true}),
        Err(reason) => json!({"is_valid": false, "reason": AssessmentErrorKind::from(reason)}),
    };

    let verdict = match rule.source {
        Source::Response(check) => evaluate_response(check, Some(&raw)).to_json(),
        Source::RowExistence => json!({"verdict": "flagged", "note": "row presence alone flags this criterion"}),
        Source::SummaryColumn => json!({
            "verdict": "not_applicable",
            "note": format!("reads summary column `{}`, not a judge response", args.criteria),
        }),
    };

    info!(criteria = %args.criteria, "checked single response");

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(
        &mut output,
        &json!({
            "criteria": args.criteria.as_str(),
            "description": rule.description,
            "validation": validation,
            "result": verdict,
        }),
    )
    .context("failed to serialize check output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}
