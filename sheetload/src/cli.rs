//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::StageKind;

/// SheetLoad - spreadsheet CSV to BigQuery loader with dbt stages
#[derive(Debug, Parser)]
#[command(name = "sheetload", author, version, about = "Load spreadsheet CSV exports into BigQuery and run dbt", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline: ingest, transform, test, document
    Run {
        /// Do not retry failed stages
        #[arg(long)]
        no_retry: bool,
    },

    /// Run only the ingest stage
    Ingest {
        /// Load into an in-memory warehouse instead of BigQuery
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single stage
    Stage {
        /// Stage to run
        #[arg(value_enum)]
        stage: StageKind,
    },

    /// Show the declared pipeline graph
    Stages {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate configuration and manifest without contacting anything
    Check,
}

/// Output format for `stages`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Yaml,
}
