use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config::load_config;
use crate::warehouse::SqliteWarehouse;

pub fn run(args: StatusArgs) -> Result<()> {
    let loaded = load_config(args.config_path.as_deref())?;
    let db_path = args
        .db_path
        .unwrap_or_else(|| args.cache_root.join("warehouse.sqlite"));
    let reports_dir = args.cache_root.join("reports");

    info!(
        cache_root = %args.cache_root.display(),
        config = %loaded.origin,
        config_sha256 = %loaded.sha256,
        departments = loaded.config.departments.len(),
        "status requested"
    );

    if reports_dir.exists() {
        let manifests = std::fs::read_dir(&reports_dir)
            .map(|entries| entries.filter_map(|entry| entry.ok()).count())
            .unwrap_or(0);
        info!(path = %reports_dir.display(), manifests, "report manifests");
    } else {
        warn!(path = %reports_dir.display(), "report directory missing");
    }

    if !db_path.exists() {
        warn!(path = %db_path.display(), "warehouse database missing");
        return Ok(());
    }

    let warehouse = SqliteWarehouse::open_read_only(&db_path)?;
    match warehouse.summary_status_counts(&loaded.config.summary_table) {
        Ok(rows) if rows.is_empty() => {
            warn!(table = %loaded.config.summary_table, "summary table is empty");
        }
        Ok(rows) => {
            for row in rows {
                info!(
                    department = %row.department,
                    date = %row.date,
                    status = %row.status,
                    conversations = row.count,
                    "summary status"
                );
            }
        }
        Err(err) => {
            warn!(
                table = %loaded.config.summary_table,
                error = %format!("{err:#}"),
                "summary table unavailable"
            );
        }
    }

    Ok(())
}
