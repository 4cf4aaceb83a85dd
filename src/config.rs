use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::criteria::{Criterion, ParsedCheck, Source};
use crate::model::CriterionFamily;

const DEFAULT_CONFIG_JSON: &str = include_str!("../config/departments.json");
const DEFAULT_SUMMARY_TABLE: &str = "CLEAN_CHATS_SUMMARY";
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_summary_table")]
    pub summary_table: String,
    pub departments: Vec<DepartmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentConfig {
    pub name: String,
    /// Match every department whose name starts with `name`.
    #[serde(default)]
    pub match_prefix: bool,
    pub conversation_source_tables: Vec<String>,
    pub criteria: Vec<CriterionBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionBinding {
    pub table: String,
    pub prompt_type: String,
    pub criteria: Criterion,
    #[serde(default)]
    pub raw_table: Option<String>,
    #[serde(default)]
    pub family: Option<CriterionFamily>,
}

impl CriterionBinding {
    pub fn name(&self) -> &str {
        &self.prompt_type
    }

    pub fn family(&self) -> CriterionFamily {
        self.family.unwrap_or_else(|| self.criteria.default_family())
    }
}

/// A validated configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    pub origin: String,
    pub sha256: String,
}

impl LoadedConfig {
    pub fn department(&self, name: &str) -> Result<&DepartmentConfig> {
        self.config
            .departments
            .iter()
            .find(|department| department.name == name)
            .with_context(|| {
                let known = self
                    .config
                    .departments
                    .iter()
                    .map(|department| department.name.as_str())
                    .collect::<Vec<&str>>()
                    .join(", ");
                format!("unknown department `{name}` (configured: {known})")
            })
    }
}

fn default_summary_table() -> String {
    DEFAULT_SUMMARY_TABLE.to_string()
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let (raw, origin) = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            (raw, path.display().to_string())
        }
        None => (DEFAULT_CONFIG_JSON.to_string(), "built-in".to_string()),
    };

    parse_config(&raw, origin)
}

pub fn parse_config(raw: &str, origin: String) -> Result<LoadedConfig> {
    let config: EngineConfig = serde_json::from_str(raw)
        .with_context(|| format!("failed to parse department config from {origin}"))?;
    validate_config(&config).with_context(|| format!("invalid department config from {origin}"))?;

    let sha256 = format!("{:x}", Sha256::digest(raw.as_bytes()));

    Ok(LoadedConfig {
        config,
        origin,
        sha256,
    })
}

fn validate_config(config: &EngineConfig) -> Result<()> {
    let identifier = Regex::new(IDENTIFIER_PATTERN).context("failed to compile identifier regex")?;
    check_identifier(&identifier, &config.summary_table, "summary_table")?;

    if config.departments.is_empty() {
        bail!("no departments configured");
    }

    let mut department_names = HashSet::new();
    for department in &config.departments {
        check_identifier(&identifier, &department.name, "department name")?;
        if !department_names.insert(department.name.as_str()) {
            bail!("department `{}` configured twice", department.name);
        }
        if department.conversation_source_tables.is_empty() {
            bail!("department `{}` has no conversation source tables", department.name);
        }
        for table in &department.conversation_source_tables {
            check_identifier(&identifier, table, "conversation_source_tables")?;
        }

        let mut prompt_types = HashSet::new();
        for binding in &department.criteria {
            check_identifier(&identifier, &binding.table, "table")?;
            if binding.prompt_type.trim().is_empty() {
                bail!(
                    "department `{}`: binding on {} has an empty prompt_type",
                    department.name,
                    binding.table
                );
            }
            if !prompt_types.insert(binding.prompt_type.as_str()) {
                bail!(
                    "department `{}`: prompt_type `{}` used twice",
                    department.name,
                    binding.prompt_type
                );
            }

            let rule = binding.criteria.rule();
            if rule.source == Source::SummaryColumn {
                check_identifier(&identifier, binding.criteria.as_str(), "summary column")?;
            }
            match (rule.parsed_check, binding.raw_table.as_deref()) {
                (ParsedCheck::RawTable, None) => bail!(
                    "department `{}`: `{}` reads a summary table and needs raw_table",
                    department.name,
                    binding.criteria
                ),
                (_, Some(raw_table)) => check_identifier(&identifier, raw_table, "raw_table")?,
                _ => {}
            }
        }
    }

    Ok(())
}

fn check_identifier(identifier: &Regex, value: &str, field: &str) -> Result<()> {
    if !identifier.is_match(value) {
        bail!("{field} `{value}` is not a valid identifier");
    }
    Ok(())
}
