//! Ingest stage
//!
//! Provision the dataset, then fetch, normalize and load each manifest entry
//! in order. One bad source never stops the others.

mod loader;
mod orchestrator;
mod provision;
mod result;

pub use loader::FileLoader;
pub use orchestrator::BatchOrchestrator;
pub use provision::{DatasetProvisioner, ProvisionOutcome};
pub use result::{IngestReport, LoadResult, LoadStatus, SUMMARY_FOOTER, SUMMARY_HEADER};
