//! Per-source load results and the run report

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of loading one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Success,
    Failed,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one File Loader call
///
/// Fields are read-only: a result is built once, through [`LoadResult::success`]
/// or [`LoadResult::failed`], which keeps `error` empty exactly when the load
/// succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    table: String,
    status: LoadStatus,
    rows: u64,
    error: String,
}

impl LoadResult {
    pub fn success(table: impl Into<String>, rows: u64) -> Self {
        Self {
            table: table.into(),
            status: LoadStatus::Success,
            rows,
            error: String::new(),
        }
    }

    pub fn failed(table: impl Into<String>, error: impl fmt::Display) -> Self {
        let mut error = error.to_string();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            table: table.into(),
            status: LoadStatus::Failed,
            rows: 0,
            error,
        }
    }

    /// Manifest entry name
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            LoadStatus::Success => write!(f, "{}: {} rows imported", self.table, self.rows),
            LoadStatus::Failed => write!(f, "{}: Error -> {}", self.table, self.error),
        }
    }
}

pub const SUMMARY_HEADER: &str = "===== CSV IMPORT LOG =====";
pub const SUMMARY_FOOTER: &str = "==========================";

/// Ordered results of one ingest run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    results: Vec<LoadResult>,
}

impl IngestReport {
    pub fn new(results: Vec<LoadResult>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[LoadResult] {
        &self.results
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total_rows(&self) -> u64 {
        self.results.iter().map(LoadResult::rows).sum()
    }

    /// Summary lines: header, one line per result, footer
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.results.len() + 2);
        lines.push(SUMMARY_HEADER.to_string());
        lines.extend(self.results.iter().map(ToString::to_string));
        lines.push(SUMMARY_FOOTER.to_string());
        lines
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary_lines().join("\n"))
    }
}
