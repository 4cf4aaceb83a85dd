use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use tracing::{error, info};

use crate::cli::ReportArgs;
use crate::config::{DepartmentConfig, load_config};
use crate::model::DepartmentReport;
use crate::report::{build_report, summary_rows};
use crate::util::{write_json_pretty, yesterday_utc};
use crate::warehouse::SqliteWarehouse;

pub fn run(args: ReportArgs) -> Result<()> {
    let loaded = load_config(args.config_path.as_deref())?;
    let date = args.date.unwrap_or_else(yesterday_utc);
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("warehouse.sqlite"));
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.cache_root.join("reports"));

    if !db_path.exists() {
        bail!("warehouse database not found: {}", db_path.display());
    }

    let departments = if args.departments.is_empty() {
        loaded.config.departments.iter().collect::<Vec<&DepartmentConfig>>()
    } else {
        args.departments
            .iter()
            .map(|name| loaded.department(name))
            .collect::<Result<Vec<&DepartmentConfig>>>()?
    };

    let mut warehouse = if args.write_summary {
        SqliteWarehouse::open(&db_path)?
    } else {
        SqliteWarehouse::open_read_only(&db_path)?
    };

    info!(
        db_path = %db_path.display(),
        config = %loaded.origin,
        config_sha256 = %loaded.sha256,
        date = %date,
        departments = departments.len(),
        "starting clean-chat report"
    );

    let mut reports = Vec::with_capacity(departments.len());
    let mut failed = Vec::new();

    for department in departments {
        let run = match build_report(&warehouse, department, date, &loaded.sha256) {
            Ok(run) => run,
            Err(err) => {
                error!(department = %department.name, error = %format!("{err:#}"), "report failed");
                failed.push(department.name.clone());
                continue;
            }
        };

        let report_path = output_dir.join(format!(
            "clean_chats_{}_{}.json",
            department.name,
            date.format("%Y%m%d")
        ));
        write_json_pretty(&report_path, &run.report)?;
        info!(path = %report_path.display(), "wrote report manifest");

        if args.write_summary {
            let rows = summary_rows(&department.name, date, &run.aggregation.records)?;
            let written = warehouse
                .write_summary_rows(&loaded.config.summary_table, &department.name, date, &rows)
                .with_context(|| format!("failed to write summary rows for {}", department.name))?;
            info!(
                department = %department.name,
                table = %loaded.config.summary_table,
                rows = written,
                "wrote summary rows"
            );
        }

        reports.push(run.report);
    }

    if args.json {
        write_json_reports(&reports)?;
    } else {
        write_text_reports(&reports)?;
    }

    if !failed.is_empty() {
        bail!("report failed for departments: {}", failed.join(", "));
    }

    Ok(())
}

fn write_json_reports(reports: &[DepartmentReport]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, reports).context("failed to serialize report json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_reports(reports: &[DepartmentReport]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    for report in reports {
        writeln!(output, "Department: {} ({})", report.department, report.date)?;
        writeln!(
            output,
            "Conversations: total={} clean={} flagged={} not_assessed={} clean_pct={:.2}",
            report.total_conversations,
            report.clean_count,
            report.flagged_count,
            report.not_assessed_count,
            report.clean_percentage,
        )?;
        writeln!(
            output,
            "Flag sources: sa_nps_only={} specialized_prompt_only={} both={}",
            report.flag_sources.sa_nps_only,
            report.flag_sources.specialized_prompt_only,
            report.flag_sources.both,
        )?;
        for (name, count) in &report.criteria_breakdown {
            writeln!(output, "  flagged by {name}: {count}")?;
        }
        for (name, count) in &report.assessment_error_breakdown {
            writeln!(output, "  not assessed by {name}: {count}")?;
        }
        if !report.skipped_evaluators.is_empty() {
            writeln!(output, "  skipped evaluators: {}", report.skipped_evaluators.join(", "))?;
        }
        writeln!(output)?;
    }

    output.flush()?;
    Ok(())
}
