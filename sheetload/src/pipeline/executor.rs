//! Executor wiring the ingest stage to the batch orchestrator

use async_trait::async_trait;
use tracing::debug;

use super::{StageAction, StageError, StageExecutor, StageSpec, run_command};
use crate::ingest::BatchOrchestrator;
use crate::manifest::Manifest;

/// Runs ingest in-process and dbt stages as child processes
pub struct PipelineExecutor {
    orchestrator: BatchOrchestrator,
    manifest: Manifest,
}

impl PipelineExecutor {
    pub fn new(orchestrator: BatchOrchestrator, manifest: Manifest) -> Self {
        Self { orchestrator, manifest }
    }
}

#[async_trait]
impl StageExecutor for PipelineExecutor {
    async fn execute(&self, stage: &StageSpec) -> Result<String, StageError> {
        debug!(stage = %stage.id, "PipelineExecutor::execute: called");
        match &stage.action {
            StageAction::Ingest => {
                // Per-source failures stay inside the report; only fatal errors fail the stage
                let report = self.orchestrator.run_all(&self.manifest).await.map_err(|e| {
                    StageError::Ingest(e.chain().map(ToString::to_string).collect::<Vec<_>>().join(": "))
                })?;
                Ok(report.to_string())
            }
            StageAction::Command {
                program,
                args,
                working_dir,
            } => run_command(program, args, working_dir).await,
        }
    }
}
