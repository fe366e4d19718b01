//! SheetLoad - spreadsheet CSV to BigQuery loader
//!
//! CLI entry point for the ingest stage and the dbt pipeline.

use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use sheetload::cli::{Cli, Command, OutputFormat};
use sheetload::config::Config;
use sheetload::ingest::{BatchOrchestrator, IngestReport};
use sheetload::pipeline::{
    CommandExecutor, PipelineDefinition, PipelineExecutor, PipelineReport, PipelineRunner, RetryPolicy, StageKind,
    StageStatus,
};
use sheetload::source::HttpFetcher;
use sheetload::warehouse::{BigQueryClient, MemoryWarehouse, Warehouse};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Logs go to stderr so the import summary on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install subscriber: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(dataset = %config.warehouse.dataset_ref(), sources = config.manifest.len(), "sheetload loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { no_retry } => cmd_run(&config, no_retry).await,
        Command::Ingest { dry_run } => cmd_ingest(&config, dry_run).await,
        Command::Stage { stage } => cmd_stage(&config, stage).await,
        Command::Stages { format } => cmd_stages(&config, format),
        Command::Check => cmd_check(&config),
    }
}

/// Construct the warehouse once for the whole run
fn build_warehouse(config: &Config, dry_run: bool) -> Result<Arc<dyn Warehouse>> {
    if dry_run {
        info!("Dry run: loading into in-memory warehouse");
        return Ok(Arc::new(MemoryWarehouse::new()));
    }
    let client = BigQueryClient::from_config(&config.warehouse).context("Failed to initialize warehouse client")?;
    Ok(Arc::new(client))
}

fn build_orchestrator(config: &Config, dry_run: bool) -> Result<BatchOrchestrator> {
    let fetcher = HttpFetcher::from_config(&config.fetch).context("Failed to initialize source fetcher")?;
    let warehouse = build_warehouse(config, dry_run)?;
    Ok(BatchOrchestrator::new(
        Arc::new(fetcher),
        warehouse,
        config.warehouse.dataset_ref(),
    ))
}

fn print_ingest_report(report: &IngestReport) {
    println!("\n{}", report);
    let counts = format!(
        "{} loaded, {} failed, {} rows",
        report.succeeded(),
        report.failed(),
        report.total_rows()
    );
    if report.failed() == 0 {
        println!("{} {}", "✓".green(), counts);
    } else {
        println!("{} {}", "!".yellow(), counts);
    }
}

/// Run the ingest stage on its own
async fn cmd_ingest(config: &Config, dry_run: bool) -> Result<()> {
    debug!(dry_run, "cmd_ingest: called");
    config.validate(!dry_run).context("Invalid configuration")?;

    let orchestrator = build_orchestrator(config, dry_run)?;
    let report = orchestrator.run_all(&config.manifest).await?;
    print_ingest_report(&report);
    Ok(())
}

/// Run one stage by kind
async fn cmd_stage(config: &Config, kind: StageKind) -> Result<()> {
    debug!(%kind, "cmd_stage: called");
    if kind == StageKind::Ingest {
        return cmd_ingest(config, false).await;
    }

    let definition = PipelineDefinition::from_config(config);
    let stage = definition
        .stage(kind)
        .ok_or_else(|| eyre::eyre!("Stage {} is not declared", kind))?;

    let executor = CommandExecutor;
    let outcome = PipelineRunner::new(&definition, &executor)
        .with_retry(RetryPolicy {
            retries: 0,
            delay: definition.retry.delay,
        })
        .run_stage(stage)
        .await;

    if outcome.status == StageStatus::Succeeded {
        println!("{} {}", "✓".green(), outcome.stage);
        Ok(())
    } else {
        Err(eyre::eyre!("Stage {} failed: {}", outcome.stage, outcome.detail))
    }
}

/// Run the whole pipeline
async fn cmd_run(config: &Config, no_retry: bool) -> Result<()> {
    debug!(no_retry, "cmd_run: called");
    config.validate(true).context("Invalid configuration")?;

    let definition = PipelineDefinition::from_config(config);
    let executor = PipelineExecutor::new(build_orchestrator(config, false)?, config.manifest.clone());

    let mut runner = PipelineRunner::new(&definition, &executor);
    if no_retry {
        runner = runner.with_retry(RetryPolicy {
            retries: 0,
            delay: definition.retry.delay,
        });
    }

    let report = runner.run().await.context("Invalid pipeline definition")?;
    print_pipeline_report(&report);

    match report.failed_stage() {
        Some(failed) => Err(eyre::eyre!("Pipeline failed at {}: {}", failed.stage, failed.detail)),
        None => Ok(()),
    }
}

fn print_pipeline_report(report: &PipelineReport) {
    for outcome in &report.outcomes {
        let marker = match outcome.status {
            StageStatus::Succeeded => "✓".green(),
            StageStatus::Failed => "✗".red(),
            StageStatus::Skipped => "-".dimmed(),
        };
        println!("{} {} ({})", marker, outcome.stage, outcome.status);
        if outcome.status == StageStatus::Succeeded && outcome.detail.contains('\n') {
            println!("{}", outcome.detail);
        }
    }
}

/// Print the declared graph
fn cmd_stages(config: &Config, format: OutputFormat) -> Result<()> {
    let definition = PipelineDefinition::from_config(config);
    definition.validate()?;

    match format {
        OutputFormat::Yaml => {
            print!("{}", definition.to_yaml()?);
        }
        OutputFormat::Text => {
            println!("{} ({})", definition.dag_id.cyan(), definition.schedule);
            println!(
                "  retries: {} (delay {}s)",
                definition.retry.retries,
                definition.retry.delay.as_secs()
            );
            for stage in definition.execution_order()? {
                let deps = if stage.deps.is_empty() {
                    "-".to_string()
                } else {
                    stage.deps.join(", ")
                };
                println!("  {} [{}] after {}", stage.id.yellow(), stage.kind, deps);
                println!("      {}", stage.action.display_command().dimmed());
            }
        }
    }
    Ok(())
}

/// Validate without I/O
fn cmd_check(config: &Config) -> Result<()> {
    config.validate(false).context("Invalid configuration")?;
    PipelineDefinition::from_config(config)
        .validate()
        .context("Invalid pipeline definition")?;

    println!("{} Configuration OK", "✓".green());
    println!("  dataset: {}", config.warehouse.dataset_ref());
    for entry in &config.manifest {
        println!("  {} -> {}", entry.name, config.warehouse.dataset_ref().table(entry.table_name()));
    }
    Ok(())
}
