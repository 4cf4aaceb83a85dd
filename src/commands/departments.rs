use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::cli::DepartmentsArgs;
use crate::config::load_config;

pub fn run(args: DepartmentsArgs) -> Result<()> {
    let loaded = load_config(args.config_path.as_deref())?;
    let mut output = io::BufWriter::new(io::stdout().lock());

    if args.json {
        serde_json::to_writer_pretty(&mut output, &loaded.config)
            .context("failed to serialize department config")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    writeln!(output, "Config: {} (sha256 {})", loaded.origin, loaded.sha256)?;
    writeln!(output, "Summary table: {}", loaded.config.summary_table)?;
    for department in &loaded.config.departments {
        let matching = if department.match_prefix { "prefix" } else { "exact" };
        writeln!(
            output,
            "{} [{matching}] sources={}",
            department.name,
            department.conversation_source_tables.join(",")
        )?;
        for binding in &department.criteria {
            let raw_table = binding
                .raw_table
                .as_deref()
                .map(|table| format!(" raw_table={table}"))
                .unwrap_or_default();
            writeln!(
                output,
                "  {:<36} {:<32} {:<36} {}{raw_table}",
                binding.prompt_type,
                binding.criteria.as_str(),
                binding.table,
                binding.family().as_str(),
            )?;
        }
    }

    output.flush()?;
    Ok(())
}
