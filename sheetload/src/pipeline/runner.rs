//! Stage execution
//!
//! [`PipelineRunner`] walks the declared graph in dependency order and stands
//! in for the external scheduler when the binary is run directly: a stage
//! starts only after its dependencies succeeded, and each stage is retried
//! according to the declared [`RetryPolicy`].

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{PipelineDefinition, PipelineError, RetryPolicy, StageAction, StageSpec};

/// Errors from running a single stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}", exit_code_label(.code))]
    ExitStatus { program: String, code: Option<i32> },

    #[error("Ingest failed: {0}")]
    Ingest(String),

    #[error("Stage '{0}' cannot be run by this executor")]
    Unsupported(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Runs one stage; `Ok` carries the stage's report text
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, stage: &StageSpec) -> Result<String, StageError>;
}

/// Run an external command with inherited stdio; exit status decides success
pub async fn run_command(program: &str, args: &[String], working_dir: &Path) -> Result<String, StageError> {
    debug!(%program, ?args, ?working_dir, "run_command: called");
    let status = tokio::process::Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| StageError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if status.success() {
        debug!("run_command: command succeeded");
        Ok(format!("{} {} completed", program, args.join(" ")))
    } else {
        debug!(code = ?status.code(), "run_command: command failed");
        Err(StageError::ExitStatus {
            program: program.to_string(),
            code: status.code(),
        })
    }
}

/// Executes only external command stages
#[derive(Debug, Default)]
pub struct CommandExecutor;

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, stage: &StageSpec) -> Result<String, StageError> {
        match &stage.action {
            StageAction::Command {
                program,
                args,
                working_dir,
            } => run_command(program, args, working_dir).await,
            StageAction::Ingest => Err(StageError::Unsupported(stage.id.clone())),
        }
    }
}

/// Final state of a stage in one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Not started because an upstream stage failed
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    pub attempts: u32,
    /// Stage report on success, last error on failure
    pub detail: String,
}

/// Outcomes of all stages, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub outcomes: Vec<StageOutcome>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == StageStatus::Succeeded)
    }

    /// First stage that failed, if any
    pub fn failed_stage(&self) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.status == StageStatus::Failed)
    }
}

/// Runs a pipeline definition with a given executor
pub struct PipelineRunner<'a> {
    definition: &'a PipelineDefinition,
    executor: &'a dyn StageExecutor,
    retry: RetryPolicy,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(definition: &'a PipelineDefinition, executor: &'a dyn StageExecutor) -> Self {
        Self {
            definition,
            executor,
            retry: definition.retry,
        }
    }

    /// Override the declared retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run every stage in dependency order, stopping at the first failure
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        debug!(dag_id = %self.definition.dag_id, "PipelineRunner::run: called");
        let order = self.definition.execution_order()?;
        let mut report = PipelineReport::default();
        let mut failed = false;

        for stage in order {
            if failed {
                info!(stage = %stage.id, "Skipping stage after upstream failure");
                report.outcomes.push(StageOutcome {
                    stage: stage.id.clone(),
                    status: StageStatus::Skipped,
                    attempts: 0,
                    detail: String::new(),
                });
                continue;
            }

            let outcome = self.run_stage(stage).await;
            failed = outcome.status == StageStatus::Failed;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Run one stage, retrying per policy
    pub async fn run_stage(&self, stage: &StageSpec) -> StageOutcome {
        let max_attempts = self.retry.retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(stage = %stage.id, attempt, "Starting stage");
            match self.executor.execute(stage).await {
                Ok(detail) => {
                    info!(stage = %stage.id, attempt, "Stage succeeded");
                    return StageOutcome {
                        stage: stage.id.clone(),
                        status: StageStatus::Succeeded,
                        attempts: attempt,
                        detail,
                    };
                }
                Err(e) if attempt < max_attempts => {
                    warn!(stage = %stage.id, attempt, error = %e, delay = ?self.retry.delay, "Stage failed, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    error!(stage = %stage.id, attempt, error = %e, "Stage failed");
                    return StageOutcome {
                        stage: stage.id.clone(),
                        status: StageStatus::Failed,
                        attempts: attempt,
                        detail: e.to_string(),
                    };
                }
            }
        }
    }
}
