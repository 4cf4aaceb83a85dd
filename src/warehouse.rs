use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, Row, params, params_from_iter};

use crate::config::DepartmentConfig;
use crate::model::SummaryRow;
use crate::util::now_utc_string;

pub const PROCESSING_COMPLETED: &str = "COMPLETED";
const IN_CLAUSE_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartmentFilter {
    Exact(String),
    Prefix(String),
}

/// Department and date every warehouse read is restricted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub department: DepartmentFilter,
    pub date: NaiveDate,
}

impl Scope {
    pub fn for_department(department: &DepartmentConfig, date: NaiveDate) -> Self {
        let filter = if department.match_prefix {
            DepartmentFilter::Prefix(department.name.clone())
        } else {
            DepartmentFilter::Exact(department.name.clone())
        };
        Self {
            department: filter,
            date,
        }
    }

    fn department_clause(&self) -> (&'static str, String) {
        match &self.department {
            DepartmentFilter::Exact(name) => ("DEPARTMENT = ?2", name.clone()),
            DepartmentFilter::Prefix(prefix) => (
                "DEPARTMENT LIKE ?2 ESCAPE '\\'",
                format!("{}%", escape_like(prefix)),
            ),
        }
    }

    fn base_params(&self) -> Vec<SqlValue> {
        let (_, department) = self.department_clause();
        vec![
            SqlValue::Text(self.date.format("%Y-%m-%d").to_string()),
            SqlValue::Text(department),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRow {
    pub conversation_id: String,
    pub llm_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCountRow {
    pub department: String,
    pub date: String,
    pub status: String,
    pub count: i64,
}

/// Read side of the warehouse as the flagging engine sees it.
pub trait Warehouse {
    fn conversation_ids(&self, table: &str, scope: &Scope) -> Result<Vec<String>>;

    /// Rows with `PROCESSING_STATUS = 'COMPLETED'` for the given conversations.
    fn fetch_responses(&self, table: &str, scope: &Scope, ids: &[String]) -> Result<Vec<ResponseRow>>;

    /// Conversations whose COMPLETED rows carry `IS_PARSED = 'FALSE'`.
    fn fetch_unparsed(&self, table: &str, scope: &Scope, ids: &[String]) -> Result<Vec<String>>;

    fn fetch_summary_values(
        &self,
        table: &str,
        column: &str,
        scope: &Scope,
        ids: &[String],
    ) -> Result<Vec<(String, Option<f64>)>>;
}

pub struct SqliteWarehouse {
    connection: Connection,
}

impl SqliteWarehouse {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open warehouse: {}", db_path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL")?;

        Ok(Self { connection })
    }

    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open warehouse read-only: {}", db_path.display()))?;

        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn query_in_batches<T>(
        &self,
        sql_head: &str,
        sql_tail: &str,
        scope: &Scope,
        ids: &[String],
        map_row: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();

        for batch in ids.chunks(IN_CLAUSE_BATCH) {
            let placeholders = (0..batch.len())
                .map(|offset| format!("?{}", offset + 3))
                .collect::<Vec<String>>()
                .join(", ");
            let sql = format!("{sql_head} AND CONVERSATION_ID IN ({placeholders}) {sql_tail}");

            let mut values = scope.base_params();
            values.extend(batch.iter().cloned().map(SqlValue::Text));

            let mut statement = self
                .connection
                .prepare(&sql)
                .with_context(|| format!("failed to prepare warehouse query: {sql_head}"))?;
            let rows = statement.query_map(params_from_iter(values), |row| map_row(row))?;
            for row in rows {
                out.push(row?);
            }
        }

        Ok(out)
    }

    /// Replaces the department/date slice of the summary table with `rows`.
    pub fn write_summary_rows(
        &mut self,
        table: &str,
        department: &str,
        date: NaiveDate,
        rows: &[SummaryRow],
    ) -> Result<usize> {
        ensure_summary_table(&self.connection, table)?;

        let created_at = now_utc_string();
        let tx = self
            .connection
            .transaction()
            .context("failed to start summary write transaction")?;

        tx.execute(
            &format!("DELETE FROM {table} WHERE DEPARTMENT = ?1 AND \"DATE\" = ?2"),
            params![department, date],
        )
        .with_context(|| format!("failed to clear previous rows in {table}"))?;

        {
            let mut insert = tx.prepare(&format!(
                "
                INSERT INTO {table}(
                  CONVERSATION_ID, DEPARTMENT, \"DATE\", STATUS, IS_FLAGGED, TRIGGERED_CRITERIA,
                  FLAGGING_DETAILS, ASSESSMENT_ERRORS, SA_NPS_FLAGGED, SPECIALIZED_PROMPT_FLAGGED, CREATED_AT
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "
            ))?;
            for row in rows {
                insert.execute(params![
                    row.conversation_id,
                    row.department,
                    row.date,
                    row.status.as_str(),
                    row.is_flagged,
                    row.triggered_criteria,
                    row.flagging_details,
                    row.assessment_errors,
                    row.sa_nps_flagged,
                    row.specialized_prompt_flagged,
                    created_at,
                ])?;
            }
        }

        tx.commit().context("failed to commit summary rows")?;
        Ok(rows.len())
    }

    pub fn summary_status_counts(&self, table: &str) -> Result<Vec<StatusCountRow>> {
        let mut statement = self
            .connection
            .prepare(&format!(
                "
                SELECT DEPARTMENT, \"DATE\", STATUS, COUNT(*)
                FROM {table}
                GROUP BY DEPARTMENT, \"DATE\", STATUS
                ORDER BY \"DATE\" DESC, DEPARTMENT ASC, STATUS ASC
                "
            ))
            .with_context(|| format!("failed to read summary table {table}"))?;

        let rows = statement.query_map([], |row| {
            Ok(StatusCountRow {
                department: row.get(0)?,
                date: row.get(1)?,
                status: row.get(2)?,
                count: row.get(3)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl Warehouse for SqliteWarehouse {
    fn conversation_ids(&self, table: &str, scope: &Scope) -> Result<Vec<String>> {
        let (department_clause, _) = scope.department_clause();
        let sql = format!(
            "
            SELECT DISTINCT CONVERSATION_ID
            FROM {table}
            WHERE DATE(\"DATE\") = ?1 AND {department_clause} AND CONVERSATION_ID IS NOT NULL
            ORDER BY CONVERSATION_ID ASC
            "
        );

        let mut statement = self
            .connection
            .prepare(&sql)
            .with_context(|| format!("failed to query conversation ids from {table}"))?;
        let rows = statement.query_map(params_from_iter(scope.base_params()), |row| row.get(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn fetch_responses(&self, table: &str, scope: &Scope, ids: &[String]) -> Result<Vec<ResponseRow>> {
        let (department_clause, _) = scope.department_clause();
        let head = format!(
            "
            SELECT CONVERSATION_ID, LLM_RESPONSE
            FROM {table}
            WHERE DATE(\"DATE\") = ?1 AND {department_clause}
              AND PROCESSING_STATUS = '{PROCESSING_COMPLETED}'
            "
        );

        self.query_in_batches(&head, "ORDER BY CONVERSATION_ID ASC", scope, ids, |row| {
            Ok(ResponseRow {
                conversation_id: row.get(0)?,
                llm_response: sql_text(row.get(1)?),
            })
        })
        .with_context(|| format!("failed to fetch responses from {table}"))
    }

    fn fetch_unparsed(&self, table: &str, scope: &Scope, ids: &[String]) -> Result<Vec<String>> {
        let (department_clause, _) = scope.department_clause();
        let head = format!(
            "
            SELECT DISTINCT CONVERSATION_ID
            FROM {table}
            WHERE DATE(\"DATE\") = ?1 AND {department_clause}
              AND PROCESSING_STATUS = '{PROCESSING_COMPLETED}'
              AND upper(CAST(IS_PARSED AS TEXT)) = 'FALSE'
            "
        );

        self.query_in_batches(&head, "ORDER BY CONVERSATION_ID ASC", scope, ids, |row| row.get(0))
            .with_context(|| format!("failed to scan IS_PARSED flags in {table}"))
    }

    fn fetch_summary_values(
        &self,
        table: &str,
        column: &str,
        scope: &Scope,
        ids: &[String],
    ) -> Result<Vec<(String, Option<f64>)>> {
        let (department_clause, _) = scope.department_clause();
        let head = format!(
            "
            SELECT CONVERSATION_ID, {column}
            FROM {table}
            WHERE DATE(\"DATE\") = ?1 AND {department_clause}
            "
        );

        self.query_in_batches(&head, "ORDER BY CONVERSATION_ID ASC", scope, ids, |row| {
            Ok((row.get(0)?, sql_number(row.get(1)?)))
        })
        .with_context(|| format!("failed to fetch {column} from {table}"))
    }
}

fn sql_text(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(text) => Some(text),
        SqlValue::Integer(number) => Some(number.to_string()),
        SqlValue::Real(number) => Some(number.to_string()),
        SqlValue::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn sql_number(value: SqlValue) -> Option<f64> {
    match value {
        SqlValue::Integer(number) => Some(number as f64),
        SqlValue::Real(number) => Some(number),
        SqlValue::Text(text) => text.trim().parse::<f64>().ok(),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn ensure_summary_table(connection: &Connection, table: &str) -> Result<()> {
    connection
        .execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {table} (
              CONVERSATION_ID TEXT NOT NULL,
              DEPARTMENT TEXT NOT NULL,
              \"DATE\" TEXT NOT NULL,
              STATUS TEXT NOT NULL,
              IS_FLAGGED INTEGER NOT NULL,
              TRIGGERED_CRITERIA TEXT,
              FLAGGING_DETAILS TEXT,
              ASSESSMENT_ERRORS TEXT,
              SA_NPS_FLAGGED INTEGER NOT NULL,
              SPECIALIZED_PROMPT_FLAGGED INTEGER NOT NULL,
              CREATED_AT TEXT NOT NULL,
              PRIMARY KEY (CONVERSATION_ID, DEPARTMENT, \"DATE\")
            );
            "
        ))
        .with_context(|| format!("failed to ensure summary table {table}"))
}
