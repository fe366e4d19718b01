//! Pipeline graph and stage execution

mod definition;
mod executor;
mod runner;

pub use definition::{
    PipelineDefinition, PipelineError, RetryPolicy, StageAction, StageKind, StageSpec, topological_sort,
    validate_dependency_graph,
};
pub use executor::PipelineExecutor;
pub use runner::{
    CommandExecutor, PipelineReport, PipelineRunner, StageError, StageExecutor, StageOutcome, StageStatus, run_command,
};
