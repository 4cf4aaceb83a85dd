use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::criteria::Criterion;

#[derive(Parser, Debug)]
#[command(
    name = "clean-chats",
    version,
    about = "Flag customer-service conversations from LLM judge verdicts and report clean chats"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Report(ReportArgs),
    Status(StatusArgs),
    Departments(DepartmentsArgs),
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(long, default_value = ".cache/clean_chats")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Departments to report on; every configured department when omitted.
    #[arg(long = "department")]
    pub departments: Vec<String>,

    /// Conversation date (YYYY-MM-DD); defaults to yesterday (UTC).
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Directory for report manifests; defaults to <cache-root>/reports.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub write_summary: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/clean_chats")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub config_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DepartmentsArgs {
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[arg(long)]
    pub criteria: Criterion,

    #[arg(long, conflicts_with = "response_path", required_unless_present = "response_path")]
    pub response: Option<String>,

    #[arg(long)]
    pub response_path: Option<PathBuf>,
}
