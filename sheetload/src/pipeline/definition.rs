//! Pipeline graph declaration
//!
//! Four stages with a strict linear dependency chain:
//! ingest -> transform -> test -> document. The declaration also carries the
//! scheduling contract (schedule, start date, retry policy) handed to the
//! external scheduler.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// The four pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Load CSV sources into the warehouse
    Ingest,
    /// dbt run
    Transform,
    /// dbt test
    Test,
    /// dbt docs generate
    Document,
}

impl StageKind {
    /// Task id used in the scheduler graph
    pub fn task_id(&self) -> &'static str {
        match self {
            Self::Ingest => "import_csv_links_to_bq",
            Self::Transform => "dbt_run_transformations",
            Self::Test => "dbt_test_data_quality",
            Self::Document => "dbt_generate_docs",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Transform => write!(f, "transform"),
            Self::Test => write!(f, "test"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// What a stage does when it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StageAction {
    /// In-process ingest stage
    Ingest,
    /// External command; exit status decides success
    Command {
        program: String,
        args: Vec<String>,
        #[serde(rename = "working-dir")]
        working_dir: PathBuf,
    },
}

impl StageAction {
    /// Shell-style rendering for display
    pub fn display_command(&self) -> String {
        match self {
            Self::Ingest => "(in-process ingest)".to_string(),
            Self::Command {
                program,
                args,
                working_dir,
            } => format!("cd {} && {} {}", working_dir.display(), program, args.join(" ")),
        }
    }
}

/// One node of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    pub kind: StageKind,
    pub deps: Vec<String>,
    pub action: StageAction,
}

/// Retry policy applied per stage by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    #[serde(rename = "delay-secs", with = "duration_secs")]
    pub delay: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Errors in the declared graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Duplicate stage id: {0}")]
    DuplicateStage(String),

    #[error("Stage '{stage}' depends on unknown stage '{dep}'")]
    UnknownDependency { stage: String, dep: String },

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Declared pipeline: scheduling contract plus stage graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(rename = "dag-id")]
    pub dag_id: String,
    pub description: String,
    pub owner: String,
    pub schedule: String,
    #[serde(rename = "start-date")]
    pub start_date: NaiveDate,
    pub catchup: bool,
    pub tags: Vec<String>,
    pub retry: RetryPolicy,
    pub stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Build the ingest -> transform -> test -> document graph from config
    pub fn from_config(config: &Config) -> Self {
        debug!("PipelineDefinition::from_config: called");
        let pipeline = &config.pipeline;
        let profiles_dir = pipeline.profiles_dir.display().to_string();

        let dbt = |subcommand: &[&str]| {
            let mut args: Vec<String> = subcommand.iter().map(|s| s.to_string()).collect();
            args.push("--profiles-dir".to_string());
            args.push(profiles_dir.clone());
            StageAction::Command {
                program: pipeline.dbt_bin.clone(),
                args,
                working_dir: pipeline.project_dir.clone(),
            }
        };

        let stages = vec![
            (StageKind::Ingest, StageAction::Ingest),
            (StageKind::Transform, dbt(&["run"])),
            (StageKind::Test, dbt(&["test"])),
            (StageKind::Document, dbt(&["docs", "generate"])),
        ];

        Self {
            dag_id: pipeline.dag_id.clone(),
            description: pipeline.description.clone(),
            owner: pipeline.owner.clone(),
            schedule: pipeline.schedule.clone(),
            start_date: pipeline.start_date,
            catchup: pipeline.catchup,
            tags: pipeline.tags.clone(),
            retry: RetryPolicy {
                retries: pipeline.retries,
                delay: pipeline.retry_delay(),
            },
            stages: linear_chain(stages),
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Check ids are unique, dependencies exist and there are no cycles
    pub fn validate(&self) -> Result<(), PipelineError> {
        debug!(stages = self.stages.len(), "PipelineDefinition::validate: called");
        let mut ids = HashSet::new();
        for stage in &self.stages {
            if !ids.insert(stage.id.as_str()) {
                return Err(PipelineError::DuplicateStage(stage.id.clone()));
            }
        }
        for stage in &self.stages {
            if let Some(dep) = stage.deps.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(PipelineError::UnknownDependency {
                    stage: stage.id.clone(),
                    dep: dep.clone(),
                });
            }
        }
        validate_dependency_graph(&self.stages).map_err(PipelineError::Cycle)
    }

    /// Stages in execution order (dependencies first)
    pub fn execution_order(&self) -> Result<Vec<&StageSpec>, PipelineError> {
        self.validate()?;
        let order = topological_sort(&self.stages);
        Ok(order.into_iter().map(|i| &self.stages[i]).collect())
    }

    /// Render the declaration for an external scheduler
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Chain stages so each depends on the one before it
fn linear_chain(stages: Vec<(StageKind, StageAction)>) -> Vec<StageSpec> {
    let mut previous: Option<String> = None;
    stages
        .into_iter()
        .map(|(kind, action)| {
            let id = kind.task_id().to_string();
            let deps = previous.replace(id.clone()).into_iter().collect();
            StageSpec { id, kind, deps, action }
        })
        .collect()
}

/// Validate a dependency graph for cycles
///
/// Uses DFS to detect cycles. Returns Ok(()) if no cycles, Err with the cycle path if found.
pub fn validate_dependency_graph(stages: &[StageSpec]) -> Result<(), Vec<String>> {
    debug!("validate_dependency_graph: called");
    let stage_map: HashMap<&str, &StageSpec> = stages.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut cycle_path = Vec::new();

    // Walk in declaration order so the reported cycle is deterministic
    for stage in stages {
        let id = stage.id.as_str();
        if !visited.contains(id) && has_cycle_dfs(id, &stage_map, &mut visited, &mut rec_stack, &mut cycle_path) {
            debug!(?cycle_path, "validate_dependency_graph: cycle detected");
            return Err(cycle_path);
        }
    }

    Ok(())
}

/// DFS helper for cycle detection
fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a StageSpec>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(stage) = graph.get(node) {
        for dep in &stage.deps {
            let dep = dep.as_str();
            if !visited.contains(dep) {
                if graph.contains_key(dep) && has_cycle_dfs(dep, graph, visited, rec_stack, cycle_path) {
                    return true;
                }
            } else if rec_stack.contains(dep) {
                cycle_path.push(dep.to_string());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}

/// Topologically sort stages by dependencies
///
/// Returns indices into the input slice, dependencies first. Callers must
/// validate the graph first.
pub fn topological_sort(stages: &[StageSpec]) -> Vec<usize> {
    let index_map: HashMap<&str, usize> = stages.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();

    let mut visited = HashSet::new();
    let mut result = Vec::new();

    for idx in 0..stages.len() {
        topo_dfs_idx(idx, stages, &index_map, &mut visited, &mut result);
    }

    result
}

fn topo_dfs_idx(
    idx: usize,
    stages: &[StageSpec],
    index_map: &HashMap<&str, usize>,
    visited: &mut HashSet<usize>,
    result: &mut Vec<usize>,
) {
    if !visited.insert(idx) {
        return;
    }

    for dep in &stages[idx].deps {
        if let Some(&dep_idx) = index_map.get(dep.as_str()) {
            topo_dfs_idx(dep_idx, stages, index_map, visited, result);
        }
    }
    result.push(idx);
}
